//! The lifecycle state machine of a unit instance.
//!
//! Every API call is an [`Operation`] with a fixed set of states it is legal in. The instance
//! consults [`Operation::is_legal`] before doing any work, so legality is decided in one place.

use std::{collections::BTreeSet, sync::Mutex};

use fmi::InterfaceType;

/// Represents the current state of the model instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelState {
    Instantiated,
    InitializationMode,
    EventMode,
    ContinuousTimeMode,
    StepMode,
    /// An asynchronous `do_step` is running.
    StepInProgress,
    /// A pending step was cancelled; stepping requires a restore or reset first.
    StepCanceled,
    Terminated,
    Error,
    Fatal,
}

impl ModelState {
    /// `Error` and `Fatal` are never left again.
    pub fn is_absorbing(self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

/// The API calls subject to the lifecycle rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetDebugLogging,
    SetupExperiment,
    EnterInitializationMode,
    ExitInitializationMode,
    Terminate,
    Reset,
    GetVariables,
    SetVariables,
    GetVariableDependencies,
    GetFmuState,
    SetFmuState,
    FreeFmuState,
    SerializeFmuState,
    DeserializeFmuState,
    GetDirectionalDerivative,
    // Model Exchange
    EnterEventMode,
    NewDiscreteStates,
    EnterContinuousTimeMode,
    CompletedIntegratorStep,
    SetTime,
    SetContinuousStates,
    GetContinuousStates,
    GetDerivatives,
    GetEventIndicators,
    GetNominalsOfContinuousStates,
    GetNumberOfEventIndicators,
    GetNumberOfContinuousStates,
    // Co-Simulation
    SetInputDerivatives,
    GetOutputDerivatives,
    DoStep,
    CancelStep,
    GetStatus,
}

impl Operation {
    /// The discipline the operation belongs to, `None` for common operations.
    pub fn interface(self) -> Option<InterfaceType> {
        use Operation::*;
        match self {
            EnterEventMode
            | NewDiscreteStates
            | EnterContinuousTimeMode
            | CompletedIntegratorStep
            | SetTime
            | SetContinuousStates
            | GetContinuousStates
            | GetDerivatives
            | GetEventIndicators
            | GetNominalsOfContinuousStates
            | GetNumberOfEventIndicators
            | GetNumberOfContinuousStates => Some(InterfaceType::ModelExchange),
            SetInputDerivatives | GetOutputDerivatives | DoStep | CancelStep | GetStatus => {
                Some(InterfaceType::CoSimulation)
            }
            _ => None,
        }
    }

    /// The states the operation may be called in.
    pub fn legal_states(self) -> &'static [ModelState] {
        use ModelState::*;
        use Operation::*;
        match self {
            SetDebugLogging | FreeFmuState | SerializeFmuState | DeserializeFmuState => &[
                Instantiated,
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepInProgress,
                StepCanceled,
                Terminated,
                Error,
            ],
            SetupExperiment | EnterInitializationMode => &[Instantiated],
            ExitInitializationMode => &[InitializationMode],
            Terminate => &[
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepCanceled,
            ],
            Reset => &[
                Instantiated,
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepCanceled,
                Terminated,
            ],
            GetVariables => &[
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepCanceled,
                Terminated,
                Error,
            ],
            SetVariables => &[
                Instantiated,
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
            ],
            GetVariableDependencies | GetNumberOfEventIndicators | GetNumberOfContinuousStates => &[
                Instantiated,
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepCanceled,
                Terminated,
            ],
            GetFmuState => &[
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                Terminated,
            ],
            SetFmuState => &[
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                StepMode,
                StepCanceled,
                Terminated,
            ],
            GetDirectionalDerivative => &[InitializationMode, EventMode, ContinuousTimeMode, StepMode],
            EnterEventMode | CompletedIntegratorStep | SetContinuousStates => &[ContinuousTimeMode],
            NewDiscreteStates | EnterContinuousTimeMode => &[EventMode],
            SetTime => &[EventMode, ContinuousTimeMode],
            GetContinuousStates | GetDerivatives | GetEventIndicators | GetNominalsOfContinuousStates => &[
                InitializationMode,
                EventMode,
                ContinuousTimeMode,
                Terminated,
                Error,
            ],
            SetInputDerivatives => &[InitializationMode, StepMode],
            GetOutputDerivatives => &[StepMode, Terminated, Error],
            DoStep => &[StepMode],
            CancelStep => &[StepInProgress],
            GetStatus => &[StepMode, StepInProgress, StepCanceled, Terminated, Error],
        }
    }

    /// Whether the operation is legal for an instance of `interface` in `state`.
    pub fn is_legal(self, state: ModelState, interface: InterfaceType) -> bool {
        self.interface().is_none_or(|required| required == interface)
            && self.legal_states().contains(&state)
    }
}

/// Unit types that returned `Fatal`, keyed by instantiation token.
static POISONED: Mutex<BTreeSet<&'static str>> = Mutex::new(BTreeSet::new());

/// Mark all instances of the unit type with `token` as irreparably failed.
pub(crate) fn poison(token: &'static str) {
    POISONED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(token);
}

/// Whether any instance of the unit type with `token` returned `Fatal`.
pub(crate) fn is_poisoned(token: &str) -> bool {
    POISONED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .contains(token)
}
