use std::{
    collections::BTreeMap,
    path::Path,
    sync::{atomic::Ordering, Arc},
};

use fmi::{
    fmi3::{CallbackFunctions, Fmi3Error, Fmi3Res, Fmi3Status, ValueReference, VariableDependency},
    EventFlags, InterfaceType,
};

use crate::{
    fmi3::{
        lifecycle::{self, ModelState, Operation},
        traits::{ContinuousState, Model, ModelLoggingCategory},
        variable::{ModelVariable, StartValues},
    },
    store::{Store, StoreBuilder, VariableType},
};

mod co_simulation;
mod common;
mod context;
mod get_set;
mod model_exchange;

pub use context::ModelContext;

pub(crate) use co_simulation::PendingStep;

/// Static description of a unit type, shared by all copies of an instance.
#[derive(Debug)]
pub(crate) struct Metadata {
    pub variables: BTreeMap<ValueReference, ModelVariable>,
    pub dependencies: BTreeMap<ValueReference, Vec<VariableDependency>>,
    pub states: Vec<ContinuousState>,
    /// Nominal value of every element of the state vector.
    pub nominals: Vec<f64>,
    /// The store holding all start values, used to (re)initialize instances and as the layout
    /// template for deserialized snapshots.
    pub start: Store,
}

impl Metadata {
    pub(crate) fn build<M: Model>() -> Result<Self, String> {
        let mut variables = BTreeMap::new();
        let mut builder = StoreBuilder::new();

        let model_variables = M::model_variables();
        if model_variables.iter().any(|var| var.value_reference() == 0) {
            return Err("value reference 0 is reserved for the independent variable time".into());
        }

        for var in std::iter::once(ModelVariable::time()).chain(model_variables) {
            if let (Some(max_size), StartValues::Binary(values)) = (var.get_max_size(), var.start()) {
                if values.iter().any(|value| value.len() > max_size) {
                    return Err(format!(
                        "start value of {} exceeds its max_size of {max_size} bytes",
                        var.name()
                    ));
                }
            }
            var.push_to(&mut builder).map_err(|e| e.to_string())?;
            variables.insert(var.value_reference(), var);
        }

        let states = M::continuous_states();
        let mut nominals = Vec::new();
        for cs in &states {
            let (Some(state), Some(derivative)) = (variables.get(&cs.state), variables.get(&cs.derivative)) else {
                return Err(format!(
                    "continuous state {} or its derivative {} is not a variable",
                    cs.state, cs.derivative
                ));
            };
            if state.variable_type() != VariableType::Float64
                || derivative.variable_type() != VariableType::Float64
            {
                return Err(format!("continuous state {} must be of type Float64", state.name()));
            }
            if state.len() != derivative.len() {
                return Err(format!(
                    "continuous state {} and its derivative differ in size",
                    state.name()
                ));
            }
            nominals.extend(std::iter::repeat(state.get_nominal().unwrap_or(1.0)).take(state.len()));
        }

        let mut dependencies: BTreeMap<ValueReference, Vec<VariableDependency>> = BTreeMap::new();
        for (dependent, dependency) in M::dependencies() {
            for vr in [dependent, dependency.independent] {
                if !variables.contains_key(&vr) {
                    return Err(format!("dependency refers to unknown value reference {vr}"));
                }
            }
            dependencies.entry(dependent).or_default().push(dependency);
        }

        Ok(Self {
            variables,
            dependencies,
            states,
            nominals,
            start: builder.build(),
        })
    }

    pub fn num_states(&self) -> usize {
        self.nominals.len()
    }
}

/// Everything that changes while simulating, besides the variable values and the user model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Dynamics {
    /// Event flags accumulated during the current event mode visit.
    pub event_flags: EventFlags,
    /// The last `new_discrete_states` of this event mode visit reached a fixpoint.
    pub discrete_states_converged: bool,
    /// `completed_integrator_step` asked for event mode, which has not been entered yet.
    pub event_mode_required: bool,
    pub last_event_time: f64,
    pub pre_event_indicators: Vec<f64>,
    /// Inputs changed since the calculated values were last refreshed.
    pub is_dirty_values: bool,
    pub last_successful_time: f64,
    /// Input derivatives of order >= 1 for the next step, keyed by (value reference, order).
    pub input_derivatives: BTreeMap<(ValueReference, i32), Vec<f64>>,
    pub last_step_status: Fmi3Status,
    pub terminate_requested: bool,
    /// Internal solver steps taken
    pub num_steps: u64,
}

impl Dynamics {
    pub fn new(num_event_indicators: usize) -> Self {
        Self {
            event_flags: EventFlags::default(),
            discrete_states_converged: false,
            event_mode_required: false,
            last_event_time: 0.0,
            pre_event_indicators: vec![0.0; num_event_indicators],
            is_dirty_values: true,
            last_successful_time: 0.0,
            input_derivatives: BTreeMap::new(),
            last_step_status: Fmi3Status::OK,
            terminate_requested: false,
            num_steps: 0,
        }
    }
}

/// An instance of the unit `M`, implementing the complete FMI 3.0 lifecycle.
pub struct ModelInstance<M: Model> {
    interface_type: InterfaceType,
    state: ModelState,
    context: ModelContext<M>,
    model: M,
    meta: Arc<Metadata>,
    callbacks: CallbackFunctions,
    visible: bool,
    dynamics: Dynamics,
    /// The asynchronous step in flight, if any.
    pending: Option<PendingStep<M>>,
}

impl<M: Model> ModelInstance<M> {
    /// Create a new instance of the unit `M` in the `Instantiated` state.
    ///
    /// The `instantiation_token` must equal [`Model::INSTANTIATION_TOKEN`]. When the
    /// `callbacks` carry a `step_finished` sink and the unit can run asynchronously, Co-Simulation
    /// steps are computed on a worker thread.
    pub fn instantiate(
        instance_name: &str,
        interface_type: InterfaceType,
        instantiation_token: &str,
        resource_path: Option<&Path>,
        callbacks: CallbackFunctions,
        visible: bool,
        logging_on: bool,
    ) -> Result<Self, fmi::Error> {
        if lifecycle::is_poisoned(M::INSTANTIATION_TOKEN) {
            return Err(fmi::Error::Instantiation(format!(
                "an instance of {} returned Fatal",
                M::MODEL_NAME
            )));
        }

        if instantiation_token != M::INSTANTIATION_TOKEN {
            log::error!(
                "Instantiation token mismatch. Expected: '{}', got: '{}'",
                M::INSTANTIATION_TOKEN,
                instantiation_token
            );
            return Err(fmi::Error::Instantiation(format!(
                "instantiation token '{instantiation_token}' does not match {}",
                M::MODEL_NAME
            )));
        }

        let supported = match interface_type {
            InterfaceType::ModelExchange => M::SUPPORTS_MODEL_EXCHANGE,
            InterfaceType::CoSimulation => M::SUPPORTS_CO_SIMULATION,
        };
        if !supported {
            return Err(fmi::Error::UnsupportedInterface(interface_type.to_string()));
        }

        let meta = Metadata::build::<M>().map_err(fmi::Error::Instantiation)?;

        let context = ModelContext::new(
            instance_name.to_owned(),
            logging_on,
            callbacks.logger.clone(),
            resource_path.map(Path::to_path_buf),
            meta.start.clone(),
        );

        log::trace!(
            "Instantiated {} '{instance_name}' as {interface_type}",
            M::MODEL_NAME
        );

        Ok(Self {
            interface_type,
            state: ModelState::Instantiated,
            context,
            model: M::default(),
            meta: Arc::new(meta),
            callbacks,
            visible,
            dynamics: Dynamics::new(M::NUM_EVENT_INDICATORS),
            pending: None,
        })
    }

    pub fn instance_name(&self) -> &str {
        self.context.instance_name()
    }

    pub fn interface_type(&self) -> InterfaceType {
        self.interface_type
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn context(&self) -> &ModelContext<M> {
        &self.context
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// The variables of the unit, including `time`.
    pub fn variables(&self) -> impl Iterator<Item = &ModelVariable> {
        self.meta.variables.values()
    }

    /// Look up a variable by name.
    pub fn variable_by_name(&self, name: &str) -> Option<&ModelVariable> {
        self.meta.variables.values().find(|var| var.name() == name)
    }

    /// Validate that `op` is legal in the current state. An illegal call moves the instance
    /// into the `Error` state.
    fn check(&mut self, op: Operation) -> Result<(), Fmi3Error> {
        if self.state == ModelState::Fatal || lifecycle::is_poisoned(M::INSTANTIATION_TOKEN) {
            self.state = ModelState::Fatal;
            return Err(Fmi3Error::Fatal);
        }

        log::trace!("{}: {op:?}", self.context.instance_name());
        self.context.log(
            Fmi3Res::OK,
            M::LoggingCategory::trace_category(),
            format_args!("{op:?}"),
        );

        if !op.is_legal(self.state, self.interface_type) {
            self.context.log(
                Fmi3Error::Error,
                M::LoggingCategory::error_category(),
                format_args!("{op:?} called in invalid state {:?}", self.state),
            );
            self.state = ModelState::Error;
            return Err(Fmi3Error::Error);
        }
        Ok(())
    }

    /// Apply the state transition for a failed operation.
    fn fail(&mut self, op: Operation, err: Fmi3Error) -> Fmi3Error {
        match err {
            Fmi3Error::Discard if matches!(op, Operation::DoStep | Operation::CancelStep) => err,
            Fmi3Error::Discard | Fmi3Error::Error => {
                if err == Fmi3Error::Discard {
                    self.context.log(
                        Fmi3Error::Error,
                        M::LoggingCategory::error_category(),
                        format_args!("{op:?} cannot discard, treating it as an error"),
                    );
                }
                if !self.state.is_absorbing() {
                    self.state = ModelState::Error;
                }
                Fmi3Error::Error
            }
            Fmi3Error::Fatal => {
                self.context.log(
                    Fmi3Error::Fatal,
                    M::LoggingCategory::error_category(),
                    format_args!("{op:?} failed irrecoverably"),
                );
                self.state = ModelState::Fatal;
                lifecycle::poison(M::INSTANTIATION_TOKEN);
                Fmi3Error::Fatal
            }
        }
    }

    /// Run `f` if `op` is legal, applying the lifecycle rules to its result.
    fn guarded<T>(
        &mut self,
        op: Operation,
        f: impl FnOnce(&mut Self) -> Result<T, Fmi3Error>,
    ) -> Result<T, Fmi3Error> {
        self.check(op)?;
        f(self).map_err(|err| self.fail(op, err))
    }

    /// Log a contract violation and return `Error`.
    fn invalid(&self, args: std::fmt::Arguments<'_>) -> Fmi3Error {
        self.context
            .log(Fmi3Error::Error, M::LoggingCategory::error_category(), args);
        Fmi3Error::Error
    }

    /// Refresh the calculated values if inputs changed since the last evaluation.
    fn update_values(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        if !self.dynamics.is_dirty_values || self.state == ModelState::Error {
            return Ok(Fmi3Res::OK);
        }
        let res = self.model.calculate_values(&mut self.context)?;
        self.dynamics.is_dirty_values = false;
        Ok(res)
    }

    fn variable(&self, vr: ValueReference) -> Result<&ModelVariable, Fmi3Error> {
        self.meta
            .variables
            .get(&vr)
            .ok_or_else(|| self.invalid(format_args!("Unknown value reference {vr}")))
    }
}

impl<M: Model> Drop for ModelInstance<M> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.store(true, Ordering::SeqCst);
            let _ = pending.handle.join();
        }
    }
}

/// Evaluate the event indicators of `model`.
pub(crate) fn event_indicators<M: Model>(
    model: &mut M,
    context: &ModelContext<M>,
) -> Result<Vec<f64>, Fmi3Error> {
    let mut indicators = vec![0.0; M::NUM_EVENT_INDICATORS];
    if !indicators.is_empty() {
        model.get_event_indicators(context, &mut indicators)?;
    }
    Ok(indicators)
}

/// Whether any event indicator changed its domain between `pre` and `cur`.
pub(crate) fn indicators_crossed(pre: &[f64], cur: &[f64]) -> bool {
    pre.iter()
        .zip(cur)
        .any(|(&pre, &cur)| (pre <= 0.0 && cur > 0.0) || (pre > 0.0 && cur <= 0.0))
}

/// Time tolerance used when comparing communication points and event times.
pub(crate) fn time_eps(t: f64) -> f64 {
    1e-9 * t.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_changes() {
        assert!(indicators_crossed(&[1.0], &[-1.0]));
        assert!(indicators_crossed(&[-1.0], &[0.5]));
        assert!(indicators_crossed(&[1.0], &[0.0]));
        assert!(!indicators_crossed(&[0.0], &[-1.0]));
        assert!(!indicators_crossed(&[2.0, -1.0], &[1.0, -3.0]));
    }
}
