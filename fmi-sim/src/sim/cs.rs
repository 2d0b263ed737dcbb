//! Co-Simulation of a single unit on a fixed communication grid.

use arrow::record_batch::RecordBatch;
use fmi::{
    fmi3::{CallbackFunctions, Fmi3Res},
    InterfaceType,
};

use crate::{options::SimOptions, Error};

use super::{
    initialize,
    io::OutputState,
    params::SimParams,
    unit::{self, SimUnit, UnitResult},
    wait_for_step, SimStats,
};

/// Run the main loop of the co-simulation on an initialized unit in Step Mode.
pub fn main_loop(
    units: &mut [Box<dyn SimUnit>],
    sim_params: &SimParams,
    output: &mut OutputState,
) -> Result<SimStats, Error> {
    let mut stats = SimStats::default();
    let mut time = sim_params.start_time;

    loop {
        output.record_outputs(time, units)?;
        let Some(unit) = units.first_mut() else {
            break;
        };
        let unit = unit.as_mut();
        let name = unit.instance_name().to_owned();

        if time >= sim_params.stop_time {
            break;
        }

        // calculate next time point
        let next_communication_point = (sim_params.start_time
            + (stats.num_steps + 1) as f64 * sim_params.output_interval)
            .min(sim_params.stop_time);
        let step_size = next_communication_point - time;

        let res = match unit.do_step(time, step_size) {
            Ok(Fmi3Res::Pending) => wait_for_step(unit),
            res => res,
        };
        res.or_failed(&name)?;

        stats.num_steps += 1;

        if unit.terminated().or_failed(&name)? {
            time = unit.last_successful_time().or_failed(&name)?;
            log::info!("Termination requested by {name} at t = {time}");
            output.record_outputs(time, units)?;
            break;
        }
        time = next_communication_point;
    }

    if let Some(unit) = units.first_mut() {
        unit.terminate().or_failed(unit.instance_name())?;
    }
    stats.end_time = time;
    Ok(stats)
}

/// Run a co-simulation of the reference unit named in `options`.
pub fn co_simulation(options: &SimOptions) -> Result<(RecordBatch, SimStats), Error> {
    let unit = unit::instantiate(
        &options.model,
        "inst1",
        InterfaceType::CoSimulation,
        CallbackFunctions::default(),
    )?;
    let sim_params = SimParams::new_from_options(options, &unit.default_experiment())?;
    let mut units = vec![unit];
    initialize(units[0].as_mut(), &sim_params, &options.initial_values)?;

    let mut output = OutputState::new(&units, false, sim_params.num_points());
    let stats = main_loop(&mut units, &sim_params, &mut output)?;
    log::info!(
        "Simulation finished at t = {:.3} after {} steps.",
        stats.end_time,
        stats.num_steps
    );

    Ok((output.finish()?, stats))
}
