#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(clippy::all)]

use arrow::{error::ArrowError, record_batch::RecordBatch};
use fmi::fmi3::Fmi3Status;

pub mod options;
pub mod sim;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fmi(#[from] fmi::Error),

    #[error("Unit '{unit}' failed with status {status}")]
    UnitFailed { unit: String, status: Fmi3Status },

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Unit '{unit}' has no variable '{variable}'")]
    UnknownVariable { unit: String, variable: String },

    #[error("Invalid start value: {0}")]
    StartValue(String),

    #[error("Invalid simulation parameters: {0}")]
    Params(String),

    #[error("Cannot record output {0}")]
    Output(String),

    #[error("Invalid system: {0}")]
    System(String),

    #[error("Algebraic loop did not converge at t = {time} within {iterations} iterations")]
    NotConverged { time: f64, iterations: usize },

    #[error("Step size fell below {min_step_size} at t = {time}")]
    StepSizeTooSmall { time: f64, min_step_size: f64 },

    #[error(transparent)]
    Solver(#[from] sim::solver::SolverError),

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Run the simulation selected by `options` and return the recorded outputs.
pub fn simulate(options: &options::FmiSimOptions) -> Result<RecordBatch, Error> {
    match &options.action {
        #[cfg(feature = "me")]
        options::Action::ModelExchange(options) => sim::me::me_simulation(options).map(|(batch, _)| batch),
        #[cfg(feature = "cs")]
        options::Action::CoSimulation(options) => sim::cs::co_simulation(options).map(|(batch, _)| batch),
        #[cfg(feature = "cs")]
        options::Action::System(options) => {
            let mut system = sim::system::System::from_file(&options.system)?;
            if let Some(stop_time) = options.stop_time {
                system.experiment.stop_time = stop_time;
            }
            sim::master::co_simulate(&system).map(|(batch, _)| batch)
        }
        #[allow(unreachable_patterns)]
        action => Err(fmi::Error::UnsupportedInterface(action.to_string()).into()),
    }
}
