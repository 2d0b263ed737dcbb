use fmi::fmi3::Fmi3Error;

use super::unit::SimUnit;

mod euler;

pub use euler::Euler;

/// The view of a Model Exchange unit a solver needs.
pub trait Model {
    fn get_continuous_states(&mut self, x: &mut [f64]) -> Result<(), Fmi3Error>;
    fn set_continuous_states(&mut self, states: &[f64]) -> Result<(), Fmi3Error>;
    fn get_continuous_state_derivatives(&mut self, dx: &mut [f64]) -> Result<(), Fmi3Error>;
    fn get_event_indicators(&mut self, z: &mut [f64]) -> Result<(), Fmi3Error>;
    fn set_time(&mut self, time: f64) -> Result<(), Fmi3Error>;
}

impl<U: SimUnit + ?Sized> Model for U {
    fn get_continuous_states(&mut self, x: &mut [f64]) -> Result<(), Fmi3Error> {
        SimUnit::get_continuous_states(self, x).map(|_| ())
    }

    fn set_continuous_states(&mut self, states: &[f64]) -> Result<(), Fmi3Error> {
        SimUnit::set_continuous_states(self, states).map(|_| ())
    }

    fn get_continuous_state_derivatives(&mut self, dx: &mut [f64]) -> Result<(), Fmi3Error> {
        SimUnit::get_derivatives(self, dx).map(|_| ())
    }

    fn get_event_indicators(&mut self, z: &mut [f64]) -> Result<(), Fmi3Error> {
        SimUnit::get_event_indicators(self, z).map(|_| ())
    }

    fn set_time(&mut self, time: f64) -> Result<(), Fmi3Error> {
        SimUnit::set_time(self, time).map(|_| ())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Step error: unit returned {0}")]
    StepError(#[from] Fmi3Error),
    #[error("Cannot step backwards from t = {from} to t = {to}")]
    Backwards { from: f64, to: f64 },
}

pub trait Solver<M: ?Sized> {
    /// Create a new Solver instance.
    /// # Arguments
    /// * `nx` - The number of continuous states.
    /// * `nz` - The number of event indicators.
    fn new(start_time: f64, tolerance: f64, nx: usize, nz: usize) -> Self;

    /// Perform a single step of the solver.
    ///
    /// # Arguments
    /// * `model` - The model to be simulated.
    /// * `next_time` - The time at which the simulation should stop.
    ///
    /// # Returns
    /// A tuple of (`time_reached`, `state_event`)
    fn step(&mut self, model: &mut M, next_time: f64) -> Result<(f64, bool), SolverError>;

    /// Reset the solver after an event changed the states
    fn reset(&mut self, model: &mut M, time: f64) -> Result<(), SolverError>;
}
