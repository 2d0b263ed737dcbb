use fmi::{
    fmi3::{Common, Fmi3Error, Fmi3Res, ValueReference, VariableDependency, FMI_VERSION, TYPES_PLATFORM},
    InterfaceType,
};

use super::{co_simulation, event_indicators, Dynamics, ModelInstance};
use crate::fmi3::{
    derivatives, lifecycle::Operation, traits::ModelLoggingCategory, FmuState, Model, ModelState,
};

impl<M: Model> Common for ModelInstance<M> {
    type FmuState = FmuState<M>;

    fn get_types_platform(&self) -> &str {
        TYPES_PLATFORM
    }

    fn get_version(&self) -> &str {
        FMI_VERSION
    }

    fn set_debug_logging(&mut self, logging_on: bool, categories: &[&str]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetDebugLogging, |inst| {
            if categories.is_empty() {
                for category in M::LoggingCategory::all_categories() {
                    inst.context.set_logging(category, logging_on);
                }
                return Ok(Fmi3Res::OK);
            }

            let mut parsed = Vec::with_capacity(categories.len());
            for &cat in categories {
                match cat.parse::<M::LoggingCategory>() {
                    Ok(category) => parsed.push(category),
                    Err(_) => {
                        return Err(inst.invalid(format_args!("Unknown logging category {cat}")));
                    }
                }
            }
            for category in parsed {
                inst.context.set_logging(category, logging_on);
            }
            Ok(Fmi3Res::OK)
        })
    }

    fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetupExperiment, |inst| {
            if let Some(stop_time) = stop_time.filter(|&stop| stop < start_time) {
                return Err(inst.invalid(format_args!(
                    "Stop time {stop_time} is before start time {start_time}"
                )));
            }
            inst.context.setup(tolerance, start_time, stop_time);
            inst.dynamics.last_successful_time = start_time;
            inst.dynamics.last_event_time = start_time;
            Ok(Fmi3Res::OK)
        })
    }

    fn enter_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::EnterInitializationMode, |inst| {
            inst.state = ModelState::InitializationMode;
            inst.dynamics.is_dirty_values = true;
            Ok(Fmi3Res::OK)
        })
    }

    fn exit_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::ExitInitializationMode, |inst| {
            // if values were set and no getter triggered an update before,
            // ensure calculated values are updated now
            let res = inst.update_values()?;
            inst.dynamics.pre_event_indicators = event_indicators(&mut inst.model, &inst.context)?;
            inst.dynamics.last_successful_time = inst.context.time();
            inst.dynamics.last_event_time = inst.context.time();

            inst.state = match inst.interface_type {
                InterfaceType::ModelExchange => {
                    inst.dynamics.discrete_states_converged = false;
                    ModelState::EventMode
                }
                InterfaceType::CoSimulation => {
                    co_simulation::handle_events(&mut inst.model, &mut inst.context, &mut inst.dynamics)?;
                    ModelState::StepMode
                }
            };
            Ok(res)
        })
    }

    fn terminate(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::Terminate, |inst| {
            inst.state = ModelState::Terminated;
            Ok(Fmi3Res::OK)
        })
    }

    fn reset(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::Reset, |inst| {
            *inst.context.store_mut() = inst.meta.start.clone();
            inst.context.setup(None, 0.0, None);
            inst.model = M::default();
            inst.dynamics = Dynamics::new(M::NUM_EVENT_INDICATORS);
            inst.state = ModelState::Instantiated;
            Ok(Fmi3Res::OK)
        })
    }

    fn get_number_of_variable_dependencies(&mut self, vr: ValueReference) -> Result<usize, Fmi3Error> {
        self.get_variable_dependencies(vr).map(|deps| deps.len())
    }

    fn get_variable_dependencies(&mut self, dependent: ValueReference) -> Result<Vec<VariableDependency>, Fmi3Error> {
        self.guarded(Operation::GetVariableDependencies, |inst| {
            inst.variable(dependent)?;
            Ok(inst
                .meta
                .dependencies
                .get(&dependent)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn get_fmu_state(&mut self) -> Result<Self::FmuState, Fmi3Error> {
        self.guarded(Operation::GetFmuState, |inst| {
            Ok(FmuState {
                interface_type: inst.interface_type,
                state: inst.state,
                model: inst.model.clone(),
                store: inst.context.store().clone(),
                time: inst.context.time(),
                start_time: inst.context.start_time(),
                stop_time: inst.context.stop_time(),
                tolerance: inst.context.tolerance(),
                dynamics: inst.dynamics.clone(),
            })
        })
    }

    fn set_fmu_state(&mut self, state: &Self::FmuState) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetFmuState, |inst| {
            if state.interface_type != inst.interface_type {
                return Err(inst.invalid(format_args!(
                    "Cannot restore a {} snapshot into a {} instance",
                    state.interface_type, inst.interface_type
                )));
            }
            let compatible = match inst.interface_type {
                InterfaceType::ModelExchange => matches!(
                    state.state,
                    ModelState::InitializationMode
                        | ModelState::EventMode
                        | ModelState::ContinuousTimeMode
                        | ModelState::Terminated
                ),
                InterfaceType::CoSimulation => matches!(
                    state.state,
                    ModelState::InitializationMode | ModelState::StepMode | ModelState::Terminated
                ),
            };
            if !compatible {
                return Err(inst.invalid(format_args!(
                    "Snapshot taken in {:?} cannot be restored",
                    state.state
                )));
            }

            inst.model = state.model.clone();
            inst.context.restore_values(
                &state.store,
                state.time,
                state.start_time,
                state.stop_time,
                state.tolerance,
            );
            inst.dynamics = state.dynamics.clone();
            inst.state = state.state;
            Ok(Fmi3Res::OK)
        })
    }

    fn free_fmu_state(&mut self, state: Self::FmuState) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::FreeFmuState, |_| {
            drop(state);
            Ok(Fmi3Res::OK)
        })
    }

    fn serialized_fmu_state_size(&mut self, state: &Self::FmuState) -> Result<usize, Fmi3Error> {
        self.guarded(Operation::SerializeFmuState, |_| Ok(state.serialized_size()))
    }

    fn serialize_fmu_state(&mut self, state: &Self::FmuState, buffer: &mut [u8]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SerializeFmuState, |inst| {
            state
                .serialize(buffer)
                .map_err(|e| inst.invalid(format_args!("Cannot serialize snapshot: {e}")))?;
            Ok(Fmi3Res::OK)
        })
    }

    fn deserialize_fmu_state(&mut self, bytes: &[u8]) -> Result<Self::FmuState, Fmi3Error> {
        self.guarded(Operation::DeserializeFmuState, |inst| {
            FmuState::deserialize(bytes, &inst.meta.start)
                .map_err(|e| inst.invalid(format_args!("Cannot deserialize snapshot: {e}")))
        })
    }

    fn get_directional_derivative(
        &mut self,
        unknowns: &[ValueReference],
        knowns: &[ValueReference],
        seed: &[f64],
        sensitivity: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetDirectionalDerivative, |inst| {
            inst.update_values()?;
            derivatives::directional_derivative(
                &inst.model,
                &inst.context,
                &inst.meta,
                unknowns,
                knowns,
                seed,
                sensitivity,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use fmi::fmi3::{CallbackFunctions, GetSet};

    use super::*;
    use crate::fmi3::{Causality, DefaultLoggingCategory, ModelVariable, UserModel, Variability};

    #[derive(Default, Clone)]
    struct Square;

    impl UserModel for Square {
        type LoggingCategory = DefaultLoggingCategory;

        fn calculate_values(&mut self, ctx: &mut crate::fmi3::ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
            let u: f64 = ctx.get(1)?;
            ctx.set(2, u * u)
                .map(|_| Fmi3Res::OK)
        }
    }

    impl Model for Square {
        const MODEL_NAME: &'static str = "Square";
        const INSTANTIATION_TOKEN: &'static str = "{square}";

        fn model_variables() -> Vec<ModelVariable> {
            vec![
                ModelVariable::new("u", 1, 3.0).causality(Causality::Input),
                ModelVariable::new("y", 2, 0.0).causality(Causality::Output),
                ModelVariable::new("p", 3, 1i32)
                    .causality(Causality::Parameter)
                    .variability(Variability::Fixed),
            ]
        }
    }

    fn instance(interface_type: InterfaceType) -> ModelInstance<Square> {
        ModelInstance::instantiate(
            "square",
            interface_type,
            Square::INSTANTIATION_TOKEN,
            None,
            CallbackFunctions::default(),
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn instantiation_checks_token_and_interface() {
        assert!(matches!(
            ModelInstance::<Square>::instantiate(
                "square",
                InterfaceType::CoSimulation,
                "{other}",
                None,
                CallbackFunctions::default(),
                false,
                false,
            ),
            Err(fmi::Error::Instantiation(_))
        ));
        let inst = instance(InterfaceType::ModelExchange);
        assert_eq!(inst.state(), ModelState::Instantiated);
        assert_eq!(inst.get_version(), "3.0-wg003.3");
        assert_eq!(inst.get_types_platform(), "default");
    }

    #[test_log::test]
    fn reads_refresh_calculated_values() {
        let mut inst = instance(InterfaceType::CoSimulation);
        inst.setup_experiment(None, 0.0, None).unwrap();
        inst.enter_initialization_mode().unwrap();
        inst.set_float64(&[1], &[4.0]).unwrap();
        let mut y = [0.0];
        inst.get_float64(&[2], &mut y).unwrap();
        assert_eq!(y, [16.0]);
    }

    #[test]
    fn fixed_parameter_is_frozen_after_initialization() {
        let mut inst = instance(InterfaceType::CoSimulation);
        inst.set_int32(&[3], &[5]).unwrap();
        inst.setup_experiment(None, 0.0, None).unwrap();
        inst.enter_initialization_mode().unwrap();
        inst.exit_initialization_mode().unwrap();
        assert_eq!(inst.set_int32(&[3], &[6]), Err(Fmi3Error::Error));
        assert_eq!(inst.state(), ModelState::Error);
        // getters remain available for diagnostics
        let mut p = [0];
        inst.get_int32(&[3], &mut p).unwrap();
        assert_eq!(p, [5]);
    }

    #[test]
    fn stop_before_start_is_rejected() {
        let mut inst = instance(InterfaceType::CoSimulation);
        assert_eq!(inst.setup_experiment(None, 1.0, Some(0.5)), Err(Fmi3Error::Error));
    }

    #[test]
    fn debug_logging_categories() {
        let mut inst = instance(InterfaceType::ModelExchange);
        inst.set_debug_logging(true, &["logEvents"]).unwrap();
        assert!(inst.context().logging_on(DefaultLoggingCategory::LogEvents));
        assert!(!inst.context().logging_on(DefaultLoggingCategory::LogAll));
        inst.set_debug_logging(true, &[]).unwrap();
        assert!(inst.context().logging_on(DefaultLoggingCategory::LogAll));
        assert_eq!(inst.set_debug_logging(true, &["logNothing"]), Err(Fmi3Error::Error));
    }

    #[test]
    fn reset_restores_start_values() {
        let mut inst = instance(InterfaceType::CoSimulation);
        inst.setup_experiment(None, 2.0, None).unwrap();
        inst.enter_initialization_mode().unwrap();
        inst.set_float64(&[1], &[10.0]).unwrap();
        inst.exit_initialization_mode().unwrap();
        inst.reset().unwrap();
        assert_eq!(inst.state(), ModelState::Instantiated);
        assert_eq!(inst.context().get::<f64>(1).unwrap(), 3.0);
        assert_eq!(inst.context().time(), 0.0);
    }
}
