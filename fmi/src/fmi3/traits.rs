//! Traits for the different instance types.

use crate::EventFlags;

use super::{DependencyKind, Fmi3Error, Fmi3Res, Fmi3Status, StatusKind, StatusValue, ValueReference};

/// Represents a single variable dependency relationship.
///
/// This structure encapsulates all the information about how one variable depends
/// on another, including element indices for array variables and the type of dependency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableDependency {
    /// Element index of the dependent variable (0 = all elements, 1+ = specific element)
    pub dependent_element_index: usize,
    /// Value reference of the independent variable this dependency relates to
    pub independent: ValueReference,
    /// Element index of the independent variable (0 = all elements, 1+ = specific element)
    pub independent_element_index: usize,
    /// The kind/type of dependency relationship
    pub dependency_kind: DependencyKind,
}

impl VariableDependency {
    /// A dependency of all elements on all elements of `independent`.
    pub fn on(independent: ValueReference, dependency_kind: DependencyKind) -> Self {
        Self {
            dependent_element_index: 0,
            independent,
            independent_element_index: 0,
            dependency_kind,
        }
    }
}

macro_rules! getter_setter {
    ($name:ident, $ty:ty) => {
        paste::paste! {
            /// Get the values of the specified variable references.
            ///
            /// Array variables consume as many slots of `values` as they have elements, and
            /// `values.len()` must equal the total element count of `vrs`.
            fn [<get_ $name>](&mut self, vrs: &[ValueReference], values: &mut [$ty]) -> Result<Fmi3Res, Fmi3Error>;
            /// Set the values of the specified variable references.
            fn [<set_ $name>](&mut self, vrs: &[ValueReference], values: &[$ty]) -> Result<Fmi3Res, Fmi3Error>;
        }
    };
}

/// FMI Getter / Setter interface
pub trait GetSet {
    getter_setter!(float32, f32);
    getter_setter!(float64, f64);
    getter_setter!(int8, i8);
    getter_setter!(int16, i16);
    getter_setter!(int32, i32);
    getter_setter!(int64, i64);
    getter_setter!(uint8, u8);
    getter_setter!(uint16, u16);
    getter_setter!(uint32, u32);
    getter_setter!(uint64, u64);
    getter_setter!(boolean, bool);

    fn get_string(&mut self, vrs: &[ValueReference], values: &mut [String]) -> Result<Fmi3Res, Fmi3Error>;

    fn set_string(&mut self, vrs: &[ValueReference], values: &[&str]) -> Result<Fmi3Res, Fmi3Error>;

    /// Get binary values from the unit.
    ///
    /// `sizes` receives the size of every binary value. When any buffer in `values` is smaller
    /// than the corresponding value, nothing is copied, the required sizes are returned in `sizes`
    /// and the call returns [`Fmi3Res::Warning`], so the caller can retry with larger buffers.
    fn get_binary(
        &mut self,
        vrs: &[ValueReference],
        sizes: &mut [usize],
        values: &mut [&mut [u8]],
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// Set binary values in the unit. The length of every slice is the size of the value.
    fn set_binary(&mut self, vrs: &[ValueReference], values: &[&[u8]]) -> Result<Fmi3Res, Fmi3Error>;
}

/// Interface common to all FMI3 instance types
pub trait Common: GetSet {
    /// Owned copy of the complete internal state of an instance.
    type FmuState;

    /// The types platform the unit was compiled for.
    fn get_types_platform(&self) -> &str;

    /// The FMI-standard version string
    fn get_version(&self) -> &str;

    /// The function controls the debug logging that is output by the unit. An empty
    /// `categories` list applies `logging_on` to all categories.
    fn set_debug_logging(&mut self, logging_on: bool, categories: &[&str]) -> Result<Fmi3Res, Fmi3Error>;

    /// Informs the unit to set up the experiment. Must be called once after instantiation and
    /// before [`Common::enter_initialization_mode()`].
    ///
    /// * `tolerance`: relative tolerance for error-controlled integration, if any.
    /// * `start_time`: the value of the independent variable at the start.
    /// * `stop_time`: the unit may not be stepped beyond this time, if defined.
    fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// Changes state to `Initialization Mode`.
    fn enter_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// Changes the state, depending on the instance type:
    /// * Model Exchange: Event Mode
    /// * Co-Simulation: Step Mode
    fn exit_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// Changes state to `Terminated`.
    fn terminate(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// Is called by the environment to reset the unit after a simulation run.
    /// The unit goes into the same state as if newly created. All variables have their default
    /// values.
    fn reset(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// This function returns the number of dependencies for a given variable.
    fn get_number_of_variable_dependencies(&mut self, vr: ValueReference) -> Result<usize, Fmi3Error>;

    /// This function returns the dependency information for a single variable.
    ///
    /// Each dependency describes how an element of the dependent variable depends on an element
    /// of an independent variable. A pair without a record is a structural zero.
    fn get_variable_dependencies(&mut self, dependent: ValueReference) -> Result<Vec<VariableDependency>, Fmi3Error>;

    /// Take a snapshot of the complete internal state.
    fn get_fmu_state(&mut self) -> Result<Self::FmuState, Fmi3Error>;

    /// Restore a snapshot. The snapshot stays valid and can be restored again.
    fn set_fmu_state(&mut self, state: &Self::FmuState) -> Result<Fmi3Res, Fmi3Error>;

    /// Release a snapshot.
    fn free_fmu_state(&mut self, state: Self::FmuState) -> Result<Fmi3Res, Fmi3Error>;

    /// Size in bytes of the serialized form of `state`.
    fn serialized_fmu_state_size(&mut self, state: &Self::FmuState) -> Result<usize, Fmi3Error>;

    /// Serialize `state` into `buffer`, whose length must equal
    /// [`Common::serialized_fmu_state_size()`].
    fn serialize_fmu_state(&mut self, state: &Self::FmuState, buffer: &mut [u8]) -> Result<Fmi3Res, Fmi3Error>;

    /// Rebuild a snapshot from its serialized form.
    fn deserialize_fmu_state(&mut self, bytes: &[u8]) -> Result<Self::FmuState, Fmi3Error>;

    /// Compute the directional derivative `sensitivity = J * seed`, where `J` is the Jacobian of
    /// the `unknowns` with respect to the `knowns`.
    fn get_directional_derivative(
        &mut self,
        unknowns: &[ValueReference],
        knowns: &[ValueReference],
        seed: &[f64],
        sensitivity: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error>;
}

/// Interface for Model Exchange instances
pub trait ModelExchange: Common {
    /// This function changes the state to Event Mode.
    ///
    /// The importer must call `enter_event_mode` when any of the following conditions are met:
    /// * time has reached `next_event_time` as returned by `new_discrete_states`, or
    /// * the signs of the event indicators signal an event, or
    /// * the unit returned with `enter_event_mode = true` from `completed_integrator_step`, or
    /// * the importer plans discrete changes to inputs.
    fn enter_event_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// Compute the next discrete states. Must be called at least once per Event Mode visit and
    /// again as long as `discrete_states_need_update` is returned.
    fn new_discrete_states(&mut self, event_flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error>;

    /// This function must be called to change from Event Mode into Continuous-Time Mode.
    fn enter_continuous_time_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// This function is called after every completed step of the integrator.
    ///
    /// * `no_set_fmu_state_prior`: `set_fmu_state()` will no longer be called for time instants
    ///   prior to current time in this simulation run.
    ///
    /// `enter_event_mode` signals that the importer must call
    /// [`ModelExchange::enter_event_mode()`] to handle a step event. When `terminate_simulation`
    /// is true, the unit requests to stop the simulation.
    fn completed_integrator_step(
        &mut self,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut bool,
        terminate_simulation: &mut bool,
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// Set a new value for the independent variable. It must not be earlier than the time of the
    /// last call to [`ModelExchange::enter_event_mode()`].
    fn set_time(&mut self, time: f64) -> Result<Fmi3Res, Fmi3Error>;

    /// Set new continuous state values, in the order of the state vector.
    fn set_continuous_states(&mut self, states: &[f64]) -> Result<Fmi3Res, Fmi3Error>;

    /// Return the current continuous state vector.
    fn get_continuous_states(&mut self, continuous_states: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;

    /// Fetch the first-order derivatives with respect to time of the continuous states.
    fn get_derivatives(&mut self, derivatives: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;

    /// Returns the event indicators signaling state events by their sign changes.
    fn get_event_indicators(&mut self, event_indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;

    /// Return the nominal values of the continuous states. If the unit has no information about
    /// the nominal value of a continuous state, 1.0 is returned.
    fn get_nominals_of_continuous_states(&mut self, nominals: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;

    /// This function returns the number of event indicators.
    fn get_number_of_event_indicators(&mut self) -> Result<usize, Fmi3Error>;

    /// This function returns the number of continuous states.
    fn get_number_of_continuous_states(&mut self) -> Result<usize, Fmi3Error>;
}

/// Interface for Co-Simulation instances
pub trait CoSimulation: Common {
    /// Set the derivatives of continuous inputs, used to extrapolate them during the next step.
    ///
    /// If multiple derivatives of a variable are set, its value reference occurs multiple times
    /// in `vrs`, aligned with `orders`. Order 0 sets the value itself. Array elements are laid out
    /// contiguously in `values`.
    fn set_input_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &[f64],
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// The returned values correspond to the derivatives at the current time of the unit. After
    /// a successful call to [`CoSimulation::do_step`], they relate to the end of the step.
    fn get_output_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// The importer requests the computation of the next time step.
    ///
    /// * `current_communication_point`: must equal the time the unit was advanced to by the
    ///   previous step, or the start time for the first step.
    /// * `communication_step_size`: must be > 0.0.
    ///
    /// Returns [`Fmi3Res::Pending`] if the step runs asynchronously; completion is then polled
    /// with [`StatusKind::DoStepStatus`]. On [`Fmi3Error::Discard`] the unit state is unchanged.
    fn do_step(
        &mut self,
        current_communication_point: f64,
        communication_step_size: f64,
        no_set_fmu_state_prior_to_current_point: bool,
    ) -> Result<Fmi3Res, Fmi3Error>;

    /// Abort a pending asynchronous step.
    fn cancel_step(&mut self) -> Result<Fmi3Res, Fmi3Error>;

    /// Query a status value of the kind's type.
    fn get_status(&mut self, kind: StatusKind) -> Result<StatusValue, Fmi3Error>;

    /// Query a status of type [`Fmi3Status`].
    fn get_fmi_status(&mut self, kind: StatusKind) -> Result<Fmi3Status, Fmi3Error> {
        match self.get_status(kind)? {
            StatusValue::Status(status) => Ok(status),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Query a status of type double.
    fn get_double_status(&mut self, kind: StatusKind) -> Result<f64, Fmi3Error> {
        match self.get_status(kind)? {
            StatusValue::Double(value) => Ok(value),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Query a status of type int32.
    fn get_int32_status(&mut self, kind: StatusKind) -> Result<i32, Fmi3Error> {
        match self.get_status(kind)? {
            StatusValue::Int32(value) => Ok(value),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Query a status of type boolean.
    fn get_bool_status(&mut self, kind: StatusKind) -> Result<bool, Fmi3Error> {
        match self.get_status(kind)? {
            StatusValue::Bool(value) => Ok(value),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Query a status of type string.
    fn get_string_status(&mut self, kind: StatusKind) -> Result<String, Fmi3Error> {
        match self.get_status(kind)? {
            StatusValue::String(value) => Ok(value),
            _ => Err(Fmi3Error::Error),
        }
    }
}
