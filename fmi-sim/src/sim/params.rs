use fmi_export::fmi3::DefaultExperiment;

use crate::{options::SimOptions, Error};

/// Number of output points when neither the options nor the unit give an interval.
const DEFAULT_OUTPUT_POINTS: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    pub start_time: f64,
    pub stop_time: f64,
    pub output_interval: f64,
    pub tolerance: Option<f64>,
}

impl SimParams {
    /// Combine the command line options with the default experiment of the unit.
    pub fn new_from_options(options: &SimOptions, experiment: &DefaultExperiment) -> Result<Self, Error> {
        let start_time = options.start_time.unwrap_or(experiment.start_time);
        let stop_time = options.stop_time.unwrap_or(experiment.stop_time);

        let output_interval = options
            .output_interval
            .or(experiment.step_size)
            .unwrap_or_else(|| (stop_time - start_time) / DEFAULT_OUTPUT_POINTS);

        if output_interval <= 0.0 || output_interval.is_nan() {
            return Err(Error::Params(format!(
                "`output_interval` must be positive, got {output_interval}"
            )));
        }

        if stop_time < start_time {
            return Err(Error::Params(format!(
                "`stop_time` {stop_time} is before `start_time` {start_time}"
            )));
        }

        let tolerance = options.tolerance.or(experiment.tolerance);

        Ok(Self {
            start_time,
            stop_time,
            output_interval,
            tolerance,
        })
    }

    /// Upper bound of the number of output points, used to size the recorders.
    pub fn num_points(&self) -> usize {
        ((self.stop_time - self.start_time) / self.output_interval).ceil() as usize + 1
    }
}
