//! FMI 3.0 API

mod logger;
mod traits;

pub use logger::{log_to_facade, CallbackFunctions, LoggerCallback, StepFinishedCallback};
pub use traits::{CoSimulation, Common, GetSet, ModelExchange, VariableDependency};

use crate::Error;

/// The FMI-standard version string reported by `get_version()`.
pub const FMI_VERSION: &str = "3.0-wg003.3";

/// The types platform reported by `get_types_platform()`.
pub const TYPES_PLATFORM: &str = "default";

/// Handle of a variable, unique within a unit.
pub type ValueReference = u32;

/// Non-error results of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fmi3Res {
    /// The call was successful. The output argument values are defined.
    OK,
    /// A non-critical problem was detected, but the computation may continue. The output argument
    /// values are defined. The unit logs further information before returning this status,
    /// respecting the current logging settings.
    Warning,
    /// The asynchronous step was started and is still running. Only returned from
    /// [`CoSimulation::do_step`] and from the `DoStepStatus` status query.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fmi3Error {
    /// The call was not successful and the unit is in the same state as before the call. The
    /// output argument values are undefined, but the computation may continue. Advanced importers
    /// may retry with different arguments (for example a smaller communication step), or restore a
    /// previously retrieved snapshot.
    ///
    /// Only [`CoSimulation::do_step`] may discard; anywhere else the unit treats it as
    /// [`Fmi3Error::Error`].
    #[error("Discard")]
    Discard,
    /// The call failed. The output argument values are undefined and the simulation must not be
    /// continued. When detecting illegal arguments or a function call not allowed in the current
    /// state, the unit returns this. Other instances of the unit are not affected by the error.
    #[error("Error")]
    Error,
    /// The model computations are irreparably corrupted for all instances of the unit type.
    #[error("Fatal")]
    Fatal,
}

/// The wire status code (`fmi3Status`).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fmi3Status {
    OK = 0,
    Warning = 1,
    Discard = 2,
    Error = 3,
    Fatal = 4,
    Pending = 5,
}

impl Fmi3Status {
    /// Convert to [`Result<Fmi3Res, Fmi3Error>`]
    #[inline]
    pub fn ok(self) -> Result<Fmi3Res, Fmi3Error> {
        self.into()
    }

    /// The ordering used to combine statuses of several calls, from benign to fatal.
    pub fn severity(self) -> u8 {
        match self {
            Self::OK => 0,
            Self::Pending => 1,
            Self::Warning => 2,
            Self::Discard => 3,
            Self::Error => 4,
            Self::Fatal => 5,
        }
    }

    /// Return whichever of the two statuses is more severe.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Fmi3Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OK => "OK",
            Self::Warning => "Warning",
            Self::Discard => "Discard",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
            Self::Pending => "Pending",
        };
        f.write_str(s)
    }
}

impl TryFrom<i32> for Fmi3Status {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::OK),
            1 => Ok(Self::Warning),
            2 => Ok(Self::Discard),
            3 => Ok(Self::Error),
            4 => Ok(Self::Fatal),
            5 => Ok(Self::Pending),
            _ => Err(Error::InvalidEnumValue {
                name: "fmi3Status",
                value,
            }),
        }
    }
}

impl From<Fmi3Res> for Fmi3Status {
    fn from(res: Fmi3Res) -> Self {
        match res {
            Fmi3Res::OK => Self::OK,
            Fmi3Res::Warning => Self::Warning,
            Fmi3Res::Pending => Self::Pending,
        }
    }
}

impl From<Fmi3Error> for Fmi3Status {
    fn from(err: Fmi3Error) -> Self {
        match err {
            Fmi3Error::Discard => Self::Discard,
            Fmi3Error::Error => Self::Error,
            Fmi3Error::Fatal => Self::Fatal,
        }
    }
}

impl From<Result<Fmi3Res, Fmi3Error>> for Fmi3Status {
    fn from(res: Result<Fmi3Res, Fmi3Error>) -> Self {
        match res {
            Ok(res) => res.into(),
            Err(err) => err.into(),
        }
    }
}

impl From<Fmi3Status> for Result<Fmi3Res, Fmi3Error> {
    fn from(status: Fmi3Status) -> Self {
        match status {
            Fmi3Status::OK => Ok(Fmi3Res::OK),
            Fmi3Status::Warning => Ok(Fmi3Res::Warning),
            Fmi3Status::Pending => Ok(Fmi3Res::Pending),
            Fmi3Status::Discard => Err(Fmi3Error::Discard),
            Fmi3Status::Error => Err(Fmi3Error::Error),
            Fmi3Status::Fatal => Err(Fmi3Error::Fatal),
        }
    }
}

/// The kind of status queried with [`CoSimulation::get_status`] (`fmi3StatusKind`).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// The status of the running or last finished `do_step`, as a [`Fmi3Status`].
    DoStepStatus = 0,
    /// A string describing the pending asynchronous computation.
    PendingStatus = 1,
    /// The time up to which the last step was computed successfully, as a double.
    LastSuccessfulTime = 2,
    /// Whether the unit requested the end of the simulation, as a boolean.
    Terminated = 3,
}

impl TryFrom<i32> for StatusKind {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::DoStepStatus),
            1 => Ok(Self::PendingStatus),
            2 => Ok(Self::LastSuccessfulTime),
            3 => Ok(Self::Terminated),
            _ => Err(Error::InvalidEnumValue {
                name: "fmi3StatusKind",
                value,
            }),
        }
    }
}

/// A status value of the type that belongs to the queried [`StatusKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Status(Fmi3Status),
    Double(f64),
    Int32(i32),
    Bool(bool),
    String(String),
}

/// Dependency kind of an unknown on a known (`fmi3DependencyKind`).
///
/// Kinds are ordered from the tightest (`Constant`) to the loosest (`Dependent`) relation.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    /// The unknown depends on the known through a constant factor.
    Constant = 1,
    /// The factor only changes during initialization.
    Fixed = 2,
    /// The factor only changes at events, when tunable parameters are set.
    Tunable = 3,
    /// The factor only changes at events.
    Discrete = 4,
    /// No particular structure is known.
    Dependent = 5,
}

impl TryFrom<i32> for DependencyKind {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Constant),
            2 => Ok(Self::Fixed),
            3 => Ok(Self::Tunable),
            4 => Ok(Self::Discrete),
            5 => Ok(Self::Dependent),
            // 0 is reserved for the independent variable and is never a dependency kind
            _ => Err(Error::InvalidEnumValue {
                name: "fmi3DependencyKind",
                value,
            }),
        }
    }
}
