//! JSON description of a system of connected units.
//!
//! ```json
//! {
//!   "units": [
//!     { "name": "source", "model": "Integrator", "start_values": { "u": 1.0 } },
//!     { "name": "sink", "model": "Integrator", "asynchronous": true }
//!   ],
//!   "connections": [{ "from": "source.x", "to": "sink.u" }],
//!   "experiment": { "stop_time": 1.0 },
//!   "master": { "step_size": 0.1, "scheme": "jacobi" }
//! }
//! ```

use std::{collections::BTreeMap, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

use super::master::MasterConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDescription {
    /// Instance name, unique within the system
    pub name: String,
    /// Name of the reference unit
    pub model: String,
    /// Start values, set during initialization
    #[serde(default)]
    pub start_values: BTreeMap<String, serde_json::Value>,
    /// Let the unit step on a worker thread
    #[serde(default)]
    pub asynchronous: bool,
}

impl UnitDescription {
    /// Start values in the textual form accepted by [`super::unit::set_start_value`].
    pub fn start_values(&self) -> impl Iterator<Item = (&str, String)> {
        self.start_values.iter().map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(value) => value.clone(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                value => value.to_string(),
            };
            (name.as_str(), value)
        })
    }
}

/// Connects an output of one unit to an input of another, both as `instance.variable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Connection {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Experiment {
    pub start_time: f64,
    pub stop_time: f64,
    pub tolerance: Option<f64>,
}

impl Default for Experiment {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            stop_time: 1.0,
            tolerance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct System {
    pub units: Vec<UnitDescription>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub experiment: Experiment,
    #[serde(default)]
    pub master: MasterConfig,
}

impl FromStr for System {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

impl System {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
