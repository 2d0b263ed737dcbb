#![doc=include_str!( "../README.md")]
#![deny(unsafe_code)]
#![deny(clippy::all)]

mod bouncing_ball;
mod dahlquist;
mod feedthrough;
mod integrator;

pub use bouncing_ball::BouncingBall;
pub use dahlquist::Dahlquist;
pub use feedthrough::Feedthrough;
pub use integrator::{Gain, Integrator};

/// Names of all reference units in this crate, as reported by [`fmi_export::fmi3::Model::MODEL_NAME`].
pub const MODEL_NAMES: &[&str] = &["BouncingBall", "Dahlquist", "Feedthrough", "Gain", "Integrator"];
