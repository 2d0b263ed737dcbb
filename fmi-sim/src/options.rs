use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::Verbosity;

#[derive(Default, Debug, Clone, Args)]
pub struct SimOptions {
    /// Name of the reference unit to simulate, e.g. `BouncingBall`
    #[arg(short, long)]
    pub model: String,

    /// Simulation start time, default is to use the default experiment of the unit.
    #[arg(long)]
    pub start_time: Option<f64>,

    /// Simulation stop time, default is to use the default experiment of the unit.
    #[arg(long)]
    pub stop_time: Option<f64>,

    /// Interval between output points (and step size of the solver or of the communication grid),
    /// default is to use the default experiment of the unit.
    #[arg(long)]
    pub output_interval: Option<f64>,

    /// Relative tolerance
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// List of initial values to set before simulating, as `name=value`.
    #[arg(long = "initial-values", num_args = 1..)]
    pub initial_values: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct SystemOptions {
    /// JSON description of the units and their connections
    #[arg(value_name = "SYSTEM")]
    pub system: PathBuf,

    /// Override the stop time of the system description
    #[arg(long)]
    pub stop_time: Option<f64>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
    /// Perform a Model Exchange simulation of a single unit
    #[command(name = "me")]
    ModelExchange(SimOptions),
    /// Perform a Co-Simulation of a single unit
    #[command(name = "cs")]
    CoSimulation(SimOptions),
    /// Co-simulate a system of connected units
    System(SystemOptions),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelExchange(_) => write!(f, "ModelExchange"),
            Self::CoSimulation(_) => write!(f, "CoSimulation"),
            Self::System(_) => write!(f, "System"),
        }
    }
}

/// Simulate FMI 3.0 reference units
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct FmiSimOptions {
    #[command(subcommand)]
    pub action: Action,

    /// Simulation result output CSV file name. Default is to print a table to standard output.
    #[arg(short, long, global = true)]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: Verbosity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cs() {
        let options = FmiSimOptions::try_parse_from([
            "fmi-sim",
            "-v",
            "cs",
            "--model",
            "BouncingBall",
            "--stop-time",
            "1.5",
            "--initial-values",
            "h=2",
            "e=0.5",
        ])
        .unwrap();
        let Action::CoSimulation(sim) = options.action else {
            panic!("expected cs, got {}", options.action);
        };
        assert_eq!(sim.model, "BouncingBall");
        assert_eq!(sim.stop_time, Some(1.5));
        assert_eq!(sim.initial_values, ["h=2", "e=0.5"]);
        assert_eq!(options.verbose.log_level_filter(), log::LevelFilter::Warn);
    }

    #[test]
    fn parse_system() {
        let options = FmiSimOptions::try_parse_from(["fmi-sim", "system", "loop.json", "-o", "out.csv"]).unwrap();
        assert!(matches!(options.action, Action::System(SystemOptions { ref system, .. }) if system.ends_with("loop.json")));
        assert_eq!(options.output_file, Some(PathBuf::from("out.csv")));
    }
}
