#[cfg(feature = "cs")]
pub mod cs;
pub mod io;
#[cfg(feature = "cs")]
pub mod master;
#[cfg(feature = "me")]
pub mod me;
pub mod params;
pub mod solver;
#[cfg(feature = "cs")]
pub mod system;
pub mod unit;

use std::time::Duration;

use fmi::fmi3::{Fmi3Error, Fmi3Res, Fmi3Status};

use crate::Error;

use self::{
    params::SimParams,
    unit::{SimUnit, UnitResult},
};

/// Pause between two polls of a pending asynchronous step.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

#[derive(Default, Debug, Clone, PartialEq)]
pub struct SimStats {
    /// End time of the simulation
    pub end_time: f64,
    /// Number of steps taken
    pub num_steps: usize,
    /// Number of events handled
    pub num_events: usize,
}

/// Split `name=value` pairs.
pub fn parse_initial_values(initial_values: &[String]) -> Result<Vec<(&str, &str)>, Error> {
    initial_values
        .iter()
        .map(|item| {
            item.split_once('=')
                .map(|(name, value)| (name.trim(), value.trim()))
                .ok_or_else(|| Error::StartValue(format!("expected `name=value`, got `{item}`")))
        })
        .collect()
}

/// Set up the experiment and initialize a single unit with the given start values. The unit
/// leaves the call in Event Mode (Model Exchange) or Step Mode (Co-Simulation).
pub(crate) fn initialize(unit: &mut dyn SimUnit, params: &SimParams, initial_values: &[String]) -> Result<(), Error> {
    let name = unit.instance_name().to_owned();
    unit.setup_experiment(params.tolerance, params.start_time, Some(params.stop_time))
        .or_failed(&name)?;
    unit.enter_initialization_mode().or_failed(&name)?;
    for (variable, value) in parse_initial_values(initial_values)? {
        unit::set_start_value(unit, variable, value)?;
    }
    unit.exit_initialization_mode().or_failed(&name)?;
    Ok(())
}

/// Poll the step status until an asynchronous step finishes.
pub(crate) fn wait_for_step(unit: &mut dyn SimUnit) -> Result<Fmi3Res, Fmi3Error> {
    loop {
        match unit.step_status()? {
            Fmi3Status::Pending => std::thread::sleep(POLL_INTERVAL),
            status => return status.ok(),
        }
    }
}
