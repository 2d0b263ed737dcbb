//! Building blocks for implementing units that follow the FMI 3.0 (wg003.3) lifecycle in Rust.
//!
//! A unit is a plain Rust type implementing [`fmi3::Model`] and [`fmi3::UserModel`]. Wrapping
//! it in a [`fmi3::ModelInstance`] yields a complete implementation of the `fmi` traits:
//!
//! ```rust
//! use fmi::{fmi3::{CallbackFunctions, Common, GetSet}, InterfaceType};
//! use fmi_export::fmi3::{
//!     Causality, DefaultLoggingCategory, Model, ModelInstance, ModelVariable, UserModel,
//! };
//!
//! #[derive(Default, Clone)]
//! struct Constant;
//!
//! impl UserModel for Constant {
//!     type LoggingCategory = DefaultLoggingCategory;
//! }
//!
//! impl Model for Constant {
//!     const MODEL_NAME: &'static str = "Constant";
//!     const INSTANTIATION_TOKEN: &'static str = "{constant}";
//!
//!     fn model_variables() -> Vec<ModelVariable> {
//!         vec![ModelVariable::new("y", 1, 4.0).causality(Causality::Output)]
//!     }
//! }
//!
//! let mut inst = ModelInstance::<Constant>::instantiate(
//!     "inst1",
//!     InterfaceType::CoSimulation,
//!     "{constant}",
//!     None,
//!     CallbackFunctions::default(),
//!     false,
//!     false,
//! )
//! .unwrap();
//! inst.setup_experiment(None, 0.0, None).unwrap();
//! inst.enter_initialization_mode().unwrap();
//! let mut y = [0.0];
//! inst.get_float64(&[1], &mut y).unwrap();
//! assert_eq!(y, [4.0]);
//! ```
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(clippy::all)]

#[cfg(feature = "fmi3")]
pub mod fmi3;
pub mod store;

// Re-export paste for use in macros
#[doc(hidden)]
pub use paste;
