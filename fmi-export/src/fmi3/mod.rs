//! ## Architecture
//!
//! [`ModelInstance`] implements the [`fmi::fmi3::Common`], [`fmi::fmi3::GetSet`],
//! [`fmi::fmi3::ModelExchange`] and [`fmi::fmi3::CoSimulation`] traits for any type implementing
//! [`Model`]. All user-model-specific behavior is delegated to the [`UserModel`] trait, while the
//! instance owns the lifecycle:
//!
//! * [`lifecycle`] decides which call is legal in which [`ModelState`],
//! * the variable [`crate::store::Store`] holds all values, described by [`ModelVariable`]s,
//! * [`FmuState`] snapshots capture and restore the complete internal state,
//! * directional derivatives are analytic when the model provides them and finite differences
//!   otherwise.

mod derivatives;
mod instance;
pub mod lifecycle;
mod snapshot;
mod traits;
mod variable;

use std::{fmt::Display, str::FromStr};

pub use instance::{ModelContext, ModelInstance};
pub use lifecycle::{ModelState, Operation};
pub use snapshot::{FmuState, SnapshotError};
pub use traits::{ContinuousState, DefaultExperiment, Model, ModelLoggingCategory, UserModel};
pub use variable::{Causality, Initial, ModelVariable, StartValues, Variability};

/// Logging categories for models that don't need custom logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DefaultLoggingCategory {
    /// Trace of all API calls
    #[default]
    LogAll,
    /// Events and discrete state updates
    LogEvents,
    /// Errors and failed calls
    LogStatusError,
}

impl Display for DefaultLoggingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogAll => write!(f, "logAll"),
            Self::LogEvents => write!(f, "logEvents"),
            Self::LogStatusError => write!(f, "logStatusError"),
        }
    }
}

impl FromStr for DefaultLoggingCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logAll" => Ok(Self::LogAll),
            "logEvents" => Ok(Self::LogEvents),
            "logStatusError" => Ok(Self::LogStatusError),
            _ => Err(format!("Unknown logging category: {}", s)),
        }
    }
}

impl ModelLoggingCategory for DefaultLoggingCategory {
    fn all_categories() -> impl Iterator<Item = Self> {
        [Self::LogAll, Self::LogEvents, Self::LogStatusError]
            .iter()
            .copied()
    }

    fn trace_category() -> Self {
        Self::LogAll
    }

    fn error_category() -> Self {
        Self::LogStatusError
    }

    fn event_category() -> Self {
        Self::LogEvents
    }
}
