use std::{fmt::Display, str::FromStr};

use bytes::BytesMut;
use fmi::{
    fmi3::{Fmi3Error, Fmi3Res, ValueReference, VariableDependency},
    EventFlags,
};

use crate::{fmi3::ModelContext, store::StoreError};

use super::variable::ModelVariable;

/// A continuous state and the variable holding its time derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousState {
    pub state: ValueReference,
    pub derivative: ValueReference,
}

impl ContinuousState {
    pub const fn new(state: ValueReference, derivative: ValueReference) -> Self {
        Self { state, derivative }
    }
}

/// The default experiment of a unit, used by importers when no explicit values are given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultExperiment {
    pub start_time: f64,
    pub stop_time: f64,
    pub step_size: Option<f64>,
    pub tolerance: Option<f64>,
}

impl Default for DefaultExperiment {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            stop_time: 1.0,
            step_size: None,
            tolerance: None,
        }
    }
}

/// Model trait, describing the structure of a unit.
///
/// It provides the metadata the generic [`crate::fmi3::ModelInstance`] needs to implement the
/// FMI 3.0 API, delegating behavior to the [`UserModel`] trait.
pub trait Model: UserModel + Default + Clone + Send + 'static {
    const MODEL_NAME: &'static str;
    const INSTANTIATION_TOKEN: &'static str;

    const SUPPORTS_MODEL_EXCHANGE: bool = true;
    const SUPPORTS_CO_SIMULATION: bool = true;

    /// Number of event indicators
    const NUM_EVENT_INDICATORS: usize = 0;

    /// Internal step size of the Co-Simulation integrator
    const FIXED_SOLVER_STEP: f64 = 1e-3;

    /// Highest derivative order accepted by `set_input_derivatives`.
    const MAX_INPUT_DERIVATIVE_ORDER: i32 = 0;

    /// Highest derivative order provided by `get_output_derivatives`.
    const MAX_OUTPUT_DERIVATIVE_ORDER: i32 = 0;

    /// Whether `do_step` may run on a worker thread when the importer provides a
    /// `step_finished` callback.
    const CAN_RUN_ASYNCHRONOUSLY: bool = false;

    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 1.0,
        step_size: None,
        tolerance: None,
    };

    /// The variables of the model, excluding `time` at value reference 0.
    fn model_variables() -> Vec<ModelVariable>;

    /// The continuous states, in the order of the state vector.
    fn continuous_states() -> Vec<ContinuousState> {
        Vec::new()
    }

    /// Dependency records as `(dependent, dependency)` pairs. A pair of variables without a
    /// record is a structural zero.
    fn dependencies() -> Vec<(ValueReference, VariableDependency)> {
        Vec::new()
    }
}

pub trait ModelLoggingCategory: Display + FromStr + Ord + Copy + Default + Send + Sync {
    /// Return an iterator over all possible logging categories
    fn all_categories() -> impl Iterator<Item = Self>;
    /// Get the category for tracing FMI API calls
    fn trace_category() -> Self;
    /// Get the category for logging errors
    fn error_category() -> Self;
    /// Get the category for logging events
    fn event_category() -> Self {
        Self::default()
    }
}

/// User-defined model behavior trait
///
/// This trait should be hand-implemented by the user to define the specific behavior of their
/// model. Variable values live in the store of the [`ModelContext`]; the model struct itself only
/// holds private state.
pub trait UserModel: Sized {
    /// The logging category type for this model
    type LoggingCategory: ModelLoggingCategory + 'static;

    /// Calculate values (derivatives, outputs, etc.)
    /// This method is called whenever the model needs to update its calculated values
    fn calculate_values(&mut self, _context: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        Ok(Fmi3Res::OK)
    }

    /// Event update function, called to update discrete states at an event.
    ///
    /// Sets the flags to indicate what has changed and whether another iteration is needed.
    fn event_update(
        &mut self,
        _context: &mut ModelContext<Self>,
        event_flags: &mut EventFlags,
    ) -> Result<Fmi3Res, Fmi3Error> {
        event_flags.reset();
        Ok(Fmi3Res::OK)
    }

    /// Get event indicators for zero-crossing detection
    fn get_event_indicators(
        &mut self,
        _context: &ModelContext<Self>,
        indicators: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        indicators.fill(0.0);
        Ok(Fmi3Res::OK)
    }

    /// Called before a Co-Simulation step is computed. Returning [`Fmi3Error::Discard`] rejects
    /// the step without changing the unit.
    fn check_step(
        &mut self,
        _context: &ModelContext<Self>,
        _current_communication_point: f64,
        _communication_step_size: f64,
    ) -> Result<Fmi3Res, Fmi3Error> {
        Ok(Fmi3Res::OK)
    }

    /// Provide the derivative of `order >= 1` of an output. Orders up to
    /// [`Model::MAX_OUTPUT_DERIVATIVE_ORDER`] are requested.
    fn get_output_derivative(
        &mut self,
        _context: &ModelContext<Self>,
        _vr: ValueReference,
        _order: i32,
        _values: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        Err(Fmi3Error::Error)
    }

    /// Analytic directional derivative. Returning `None` selects finite differences.
    fn directional_derivative(
        &mut self,
        _context: &mut ModelContext<Self>,
        _unknowns: &[ValueReference],
        _knowns: &[ValueReference],
        _seed: &[f64],
        _sensitivity: &mut [f64],
    ) -> Option<Result<Fmi3Res, Fmi3Error>> {
        None
    }

    /// Append private model state to a serialized snapshot.
    fn serialize_state(&self, _buf: &mut BytesMut) {}

    /// Restore private model state written by [`UserModel::serialize_state`].
    fn deserialize_state(&mut self, _buf: &mut &[u8]) -> Result<(), StoreError> {
        Ok(())
    }
}
