//! The `fmi` crate defines the Rust interface to units (FMUs) that follow the FMI 3.0 lifecycle
//! (header version `3.0-wg003.3`). See <http://www.fmi-standard.org/>
//!
//! A unit is any Rust type implementing the traits in [`fmi3`]:
//!
//! * [`fmi3::GetSet`] for typed variable access,
//! * [`fmi3::Common`] for the lifecycle, state snapshots and directional derivatives,
//! * [`fmi3::ModelExchange`] or [`fmi3::CoSimulation`] for the two simulation disciplines.
//!
//! ## Example
//!
//! ```rust
//! use fmi::fmi3::{Fmi3Error, Fmi3Res, Fmi3Status};
//!
//! let status = Fmi3Status::try_from(1).unwrap();
//! assert_eq!(status.ok(), Ok(Fmi3Res::Warning));
//! assert_eq!(Fmi3Status::from(Fmi3Error::Discard) as i32, 2);
//! ```
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(clippy::all)]

mod event_flags;
#[cfg(feature = "fmi3")]
pub mod fmi3;

pub use event_flags::EventFlags;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error instantiating unit: {0}")]
    Instantiation(String),

    #[error("Unknown variable: {}", name)]
    UnknownVariable { name: String },

    #[error("Unsupported Interface type: {0}")]
    UnsupportedInterface(String),

    #[error("FMI version of the unit ({found}) doesn't match expected ({expected})")]
    FmiVersionMismatch { found: String, expected: String },

    #[error("Invalid value {value} for {name}")]
    InvalidEnumValue { name: &'static str, value: i32 },

    #[cfg(feature = "fmi3")]
    #[error(transparent)]
    Fmi3Error(#[from] fmi3::Fmi3Error),
}

/// The simulation discipline of an instance, `fmi3Type` on the wire.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterfaceType {
    ModelExchange = 0,
    CoSimulation = 1,
}

impl TryFrom<i32> for InterfaceType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ModelExchange),
            1 => Ok(Self::CoSimulation),
            _ => Err(Error::InvalidEnumValue {
                name: "fmi3Type",
                value,
            }),
        }
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelExchange => write!(f, "ModelExchange"),
            Self::CoSimulation => write!(f, "CoSimulation"),
        }
    }
}

/// Compile-time tag for an interface type.
pub trait InstanceTag {
    const TYPE: InterfaceType;
}

/// Tag for Model Exchange
pub struct ME;

impl InstanceTag for ME {
    const TYPE: InterfaceType = InterfaceType::ModelExchange;
}

/// Tag for Co-Simulation
pub struct CS;

impl InstanceTag for CS {
    const TYPE: InterfaceType = InterfaceType::CoSimulation;
}
