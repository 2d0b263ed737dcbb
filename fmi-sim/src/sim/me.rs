//! Model Exchange simulation of a single unit with a fixed-step solver.

use arrow::record_batch::RecordBatch;
use fmi::{fmi3::CallbackFunctions, EventFlags, InterfaceType};

use crate::{options::SimOptions, Error};

use super::{
    initialize,
    io::OutputState,
    params::SimParams,
    solver::{Euler, Solver},
    unit::{self, SimUnit, UnitResult},
    SimStats,
};

/// Iterate `new_discrete_states` until the discrete states are consistent.
///
/// Returns `true` when the unit requested the end of the simulation.
fn handle_events(unit: &mut dyn SimUnit, event_flags: &mut EventFlags) -> Result<bool, Error> {
    loop {
        unit.new_discrete_states(event_flags)
            .or_failed(unit.instance_name())?;

        if event_flags.terminate_simulation {
            return Ok(true);
        }
        if !event_flags.discrete_states_need_update {
            return Ok(false);
        }
    }
}

/// Run the main loop of a Model Exchange simulation on an initialized unit in Event Mode.
pub fn main_loop<S>(
    units: &mut [Box<dyn SimUnit>],
    sim_params: &SimParams,
    output: &mut OutputState,
) -> Result<SimStats, Error>
where
    S: Solver<dyn SimUnit>,
{
    let mut stats = SimStats::default();
    let Some(unit) = units.first_mut() else {
        return Ok(stats);
    };
    let name = unit.instance_name().to_owned();
    let mut event_flags = EventFlags::default();
    let mut time = sim_params.start_time;

    if handle_events(unit.as_mut(), &mut event_flags)? {
        log::info!("Termination requested by {name} during initialization");
        unit.terminate().or_failed(&name)?;
        return Ok(stats);
    }
    unit.enter_continuous_time_mode().or_failed(&name)?;

    let nx = unit.get_number_of_continuous_states().or_failed(&name)?;
    let nz = unit.get_number_of_event_indicators().or_failed(&name)?;
    let mut solver = S::new(time, sim_params.tolerance.unwrap_or(0.0), nx, nz);
    solver.reset(unit.as_mut(), time)?;

    loop {
        output.record_outputs(time, units)?;
        let unit = units[0].as_mut();

        if time >= sim_params.stop_time {
            break;
        }

        // calculate next time point
        let next_regular_point = (sim_params.start_time
            + (stats.num_steps + 1) as f64 * sim_params.output_interval)
            .min(sim_params.stop_time);
        let time_event = event_flags
            .next_event_time
            .is_some_and(|next_event_time| next_event_time <= next_regular_point);
        let next_communication_point = match event_flags.next_event_time {
            Some(next_event_time) if time_event => next_event_time.max(time),
            _ => next_regular_point,
        };

        let (time_reached, state_event) = solver.step(unit, next_communication_point)?;
        time = time_reached;

        if time == next_regular_point {
            stats.num_steps += 1;
        }

        let mut step_event = false;
        let mut terminate = false;
        unit.completed_integrator_step(true, &mut step_event, &mut terminate)
            .or_failed(&name)?;

        if terminate {
            log::info!("Termination requested by {name} at t = {time}");
            break;
        }

        if time_event || state_event || step_event {
            log::trace!(
                "Event encountered at t = {time}. [Time: {time_event}, State: {state_event}, Step: {step_event}]"
            );
            stats.num_events += 1;
            unit.enter_event_mode().or_failed(&name)?;
            if handle_events(unit, &mut event_flags)? {
                log::info!("Termination requested by {name} at t = {time}");
                break;
            }
            unit.enter_continuous_time_mode().or_failed(&name)?;
            solver.reset(unit, time)?;
        }
    }

    units[0].terminate().or_failed(&name)?;
    stats.end_time = time;
    Ok(stats)
}

/// Run a Model Exchange simulation of the reference unit named in `options`.
pub fn me_simulation(options: &SimOptions) -> Result<(RecordBatch, SimStats), Error> {
    let unit = unit::instantiate(
        &options.model,
        "inst1",
        InterfaceType::ModelExchange,
        CallbackFunctions::default(),
    )?;
    let sim_params = SimParams::new_from_options(options, &unit.default_experiment())?;
    let mut units = vec![unit];
    initialize(units[0].as_mut(), &sim_params, &options.initial_values)?;

    let mut output = OutputState::new(&units, false, sim_params.num_points());
    let stats = main_loop::<Euler>(&mut units, &sim_params, &mut output)?;
    log::info!(
        "Simulation finished at t = {:.3} after {} steps and {} events.",
        stats.end_time,
        stats.num_steps,
        stats.num_events
    );

    Ok((output.finish()?, stats))
}
