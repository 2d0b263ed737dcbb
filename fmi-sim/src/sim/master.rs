//! Orchestration of a system of Co-Simulation units.
//!
//! All units are initialized together and advanced in lock-step on a common communication grid.
//! Between two steps, connected outputs are copied to the inputs they feed (zero-order hold).
//! When direct feedthrough closes a cycle through the connections, the exchange is iterated
//! until the inputs settle.
//!
//! Every unit is snapshotted before a step. If any unit discards the step, or an algebraic loop
//! does not converge, all units are restored and the step is retried with half the size.

use std::collections::HashMap;

use arrow::record_batch::RecordBatch;
use fmi::{
    fmi3::{CallbackFunctions, Fmi3Error, Fmi3Res, ValueReference},
    InterfaceType,
};
use fmi_export::{fmi3::Causality, store::VariableType};
use itertools::Itertools;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use serde::{Deserialize, Serialize};

use crate::Error;

use super::{
    io::OutputState,
    system::{Connection, Experiment, System},
    unit::{self, SimUnit, UnitResult, UnitState},
    wait_for_step,
};

/// How the inputs in an algebraic loop are updated while iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouplingScheme {
    /// Read all outputs, then write all inputs.
    Jacobi,
    /// Write every input as soon as its output was read.
    #[default]
    GaussSeidel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// Communication step size
    pub step_size: f64,
    /// Smallest step size tried after discarded steps
    pub min_step_size: f64,
    pub scheme: CouplingScheme,
    /// Largest change of any coupled input at which an algebraic loop counts as converged
    pub tolerance: f64,
    /// Exchange sweeps before an algebraic loop counts as diverged
    pub max_iterations: usize,
    /// Step units on a rayon thread pool (requires the `parallel` feature)
    pub parallel: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            step_size: 0.01,
            min_step_size: 1e-6,
            scheme: CouplingScheme::default(),
            tolerance: 1e-9,
            max_iterations: 100,
            parallel: false,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct MasterStats {
    /// End time of the simulation
    pub end_time: f64,
    /// Number of successful steps, including the reduced ones
    pub num_steps: usize,
    /// Number of steps that were rolled back and retried
    pub num_retries: usize,
    /// Largest number of exchange sweeps needed at a communication point
    pub max_sweeps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Port {
    unit: usize,
    vr: ValueReference,
}

#[derive(Debug, Clone)]
struct Coupling {
    from: Port,
    to: Port,
    name: String,
}

enum Attempt {
    /// `stopped_at` is the earliest time a unit that requested termination reached.
    Done { stopped_at: Option<f64> },
    Rejected(String),
}

pub struct Master {
    units: Vec<Box<dyn SimUnit>>,
    /// In topological order of the coupling graph
    couplings: Vec<Coupling>,
    has_loop: bool,
    config: MasterConfig,
    experiment: Experiment,
    stats: MasterStats,
}

impl Master {
    /// Resolve the connections between `units` and analyse them for algebraic loops.
    pub fn new(
        units: Vec<Box<dyn SimUnit>>,
        connections: &[Connection],
        config: MasterConfig,
        experiment: Experiment,
    ) -> Result<Self, Error> {
        if let Some(name) = units.iter().map(|unit| unit.instance_name()).duplicates().next() {
            return Err(Error::System(format!("Duplicate instance name '{name}'")));
        }
        if config.step_size <= 0.0 || config.min_step_size <= 0.0 || config.max_iterations == 0 {
            return Err(Error::System(format!("Invalid master configuration {config:?}")));
        }
        #[cfg(not(feature = "parallel"))]
        if config.parallel {
            log::warn!("Parallel stepping requires the `parallel` feature, stepping sequentially");
        }

        let mut couplings = connections
            .iter()
            .map(|connection| resolve(&units, connection))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(input) = couplings.iter().map(|coupling| coupling.to).duplicates().next() {
            let name = units[input.unit].instance_name();
            return Err(Error::System(format!(
                "Input {} of '{name}' is connected more than once",
                input.vr
            )));
        }

        let mut units = units;
        let has_loop = sort_couplings(&mut units, &mut couplings)?;
        if has_loop {
            log::info!(
                "Algebraic loop in the couplings, exchanging with {:?} iteration",
                config.scheme
            );
        }

        Ok(Self {
            units,
            couplings,
            has_loop,
            config,
            experiment,
            stats: MasterStats::default(),
        })
    }

    /// Instantiate and connect the units of a system description.
    pub fn from_system(system: &System) -> Result<Self, Error> {
        let units = system
            .units
            .iter()
            .map(|desc| {
                let callbacks = if desc.asynchronous {
                    unit::async_callbacks()
                } else {
                    CallbackFunctions::default()
                };
                unit::instantiate(&desc.model, &desc.name, InterfaceType::CoSimulation, callbacks)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(
            units,
            &system.connections,
            system.master.clone(),
            system.experiment,
        )
    }

    pub fn units(&self) -> &[Box<dyn SimUnit>] {
        &self.units
    }

    pub fn has_algebraic_loop(&self) -> bool {
        self.has_loop
    }

    /// Set up the experiment on all units and enter Initialization Mode.
    pub fn enter_initialization_mode(&mut self) -> Result<(), Error> {
        let Experiment {
            start_time,
            stop_time,
            tolerance,
        } = self.experiment;
        for unit in &mut self.units {
            unit.setup_experiment(tolerance, start_time, Some(stop_time))
                .or_failed(unit.instance_name())?;
        }
        for unit in &mut self.units {
            unit.enter_initialization_mode()
                .or_failed(unit.instance_name())?;
        }
        Ok(())
    }

    /// Set a start value on the unit called `instance`.
    pub fn set_start_value(&mut self, instance: &str, variable: &str, value: &str) -> Result<(), Error> {
        let unit = self
            .units
            .iter_mut()
            .find(|unit| unit.instance_name() == instance)
            .ok_or_else(|| Error::System(format!("Unknown unit '{instance}'")))?;
        unit::set_start_value(unit.as_mut(), variable, value)
    }

    /// Exchange the initial values and leave Initialization Mode on all units.
    pub fn exit_initialization_mode(&mut self) -> Result<(), Error> {
        self.initial_exchange()?;
        for unit in &mut self.units {
            unit.exit_initialization_mode()
                .or_failed(unit.instance_name())?;
        }
        self.initial_exchange()
    }

    fn initial_exchange(&mut self) -> Result<(), Error> {
        match self.exchange()? {
            Some(_) => Ok(()),
            None => Err(Error::NotConverged {
                time: self.experiment.start_time,
                iterations: self.config.max_iterations,
            }),
        }
    }

    /// Run an initialized system to the stop time, recording all outputs at every communication
    /// point.
    pub fn run(&mut self) -> Result<(RecordBatch, MasterStats), Error> {
        let Experiment {
            start_time,
            stop_time,
            ..
        } = self.experiment;
        let step_size = self.config.step_size;
        let num_points = ((stop_time - start_time) / step_size).ceil() as usize + 1;
        let mut output = OutputState::new(&self.units, true, num_points);

        let mut time = start_time;
        let mut point = 0;
        loop {
            output.record_outputs(time, &mut self.units)?;
            if time >= stop_time {
                break;
            }

            point += 1;
            let target = (start_time + point as f64 * step_size).min(stop_time);
            let terminated = self.advance(&mut time, target)?;

            if terminated {
                log::info!("Termination requested at t = {time}");
                output.record_outputs(time, &mut self.units)?;
                break;
            }
        }

        for unit in &mut self.units {
            unit.terminate().or_failed(unit.instance_name())?;
        }
        self.stats.end_time = time;
        log::info!(
            "Simulation finished at t = {time:.3} after {} steps and {} retries.",
            self.stats.num_steps,
            self.stats.num_retries
        );

        Ok((output.finish()?, self.stats.clone()))
    }

    /// Advance all units from `time` to `target`, halving the step size on rejection.
    ///
    /// Returns `true` when a unit requested the end of the simulation.
    fn advance(&mut self, time: &mut f64, target: f64) -> Result<bool, Error> {
        let mut step_size = target - *time;
        while *time < target {
            let remaining = target - *time;
            step_size = step_size.min(remaining);
            let snapshots = self.snapshot()?;

            match self.attempt(*time, step_size)? {
                Attempt::Done { stopped_at } => {
                    self.stats.num_steps += 1;
                    if let Some(stopped_at) = stopped_at {
                        *time = stopped_at;
                        return Ok(true);
                    }
                    *time = if step_size >= remaining {
                        target
                    } else {
                        *time + step_size
                    };
                    step_size = target - *time;
                }
                Attempt::Rejected(reason) => {
                    self.restore(&snapshots)?;
                    self.stats.num_retries += 1;
                    step_size /= 2.0;
                    if step_size < self.config.min_step_size {
                        return Err(Error::StepSizeTooSmall {
                            time: *time,
                            min_step_size: self.config.min_step_size,
                        });
                    }
                    log::debug!("{reason} at t = {time}, retrying with step size {step_size}");
                }
            }
        }
        Ok(false)
    }

    fn snapshot(&mut self) -> Result<Vec<UnitState>, Error> {
        self.units
            .iter_mut()
            .map(|unit| unit.get_state().or_failed(unit.instance_name()))
            .collect()
    }

    fn restore(&mut self, snapshots: &[UnitState]) -> Result<(), Error> {
        for (unit, snapshot) in self.units.iter_mut().zip(snapshots) {
            unit.set_state(snapshot).or_failed(unit.instance_name())?;
        }
        Ok(())
    }

    /// Step all units from `time` by `step_size` and exchange the new outputs.
    fn attempt(&mut self, time: f64, step_size: f64) -> Result<Attempt, Error> {
        let results = self.do_steps(time, step_size);

        // asynchronous units run while the others step, poll them now
        let mut discarded = None;
        let mut failed = None;
        for (unit, res) in self.units.iter_mut().zip(results) {
            let res = match res {
                Ok(Fmi3Res::Pending) if failed.is_some() => {
                    if let Err(err) = unit.cancel_step() {
                        log::warn!("Cancelling the step of '{}' failed: {err}", unit.instance_name());
                    }
                    continue;
                }
                Ok(Fmi3Res::Pending) => wait_for_step(unit.as_mut()),
                res => res,
            };
            match res {
                Ok(_) => {}
                Err(Fmi3Error::Discard) => {
                    discarded.get_or_insert_with(|| unit.instance_name().to_owned());
                }
                Err(err) => {
                    failed.get_or_insert_with(|| (unit.instance_name().to_owned(), err));
                }
            }
        }
        if let Some((unit, err)) = failed {
            return Err(err).or_failed(&unit);
        }
        if let Some(unit) = discarded {
            return Ok(Attempt::Rejected(format!("'{unit}' discarded the step")));
        }

        let mut stopped_at: Option<f64> = None;
        for unit in &mut self.units {
            let name = unit.instance_name().to_owned();
            if unit.terminated().or_failed(&name)? {
                let reached = unit.last_successful_time().or_failed(&name)?;
                log::debug!("'{name}' requested termination at t = {reached}");
                stopped_at = Some(stopped_at.map_or(reached, |earliest| earliest.min(reached)));
            }
        }

        Ok(match self.exchange()? {
            Some(_) => Attempt::Done { stopped_at },
            None => Attempt::Rejected("Algebraic loop did not converge".to_owned()),
        })
    }

    fn do_steps(&mut self, time: f64, step_size: f64) -> Vec<Result<Fmi3Res, Fmi3Error>> {
        #[cfg(feature = "parallel")]
        if self.config.parallel {
            use rayon::prelude::*;
            return self
                .units
                .par_iter_mut()
                .map(|unit| unit.do_step(time, step_size))
                .collect();
        }
        self.units
            .iter_mut()
            .map(|unit| unit.do_step(time, step_size))
            .collect()
    }

    fn read(&mut self, port: Port) -> Result<f64, Error> {
        let unit = &mut self.units[port.unit];
        let mut value = [0.0];
        unit.get_float64(&[port.vr], &mut value)
            .or_failed(unit.instance_name())?;
        Ok(value[0])
    }

    /// Write an input, returning the magnitude of the change.
    fn write(&mut self, port: Port, value: f64) -> Result<f64, Error> {
        let previous = self.read(port)?;
        let unit = &mut self.units[port.unit];
        unit.set_float64(&[port.vr], &[value])
            .or_failed(unit.instance_name())?;
        Ok((value - previous).abs())
    }

    fn gauss_seidel_sweep(&mut self) -> Result<f64, Error> {
        let mut change = 0.0f64;
        for index in 0..self.couplings.len() {
            let Coupling { from, to, .. } = self.couplings[index];
            let value = self.read(from)?;
            change = change.max(self.write(to, value)?);
        }
        Ok(change)
    }

    fn jacobi_sweep(&mut self) -> Result<f64, Error> {
        let froms = self.couplings.iter().map(|coupling| coupling.from).collect_vec();
        let values = froms
            .into_iter()
            .map(|from| self.read(from))
            .collect::<Result<Vec<_>, _>>()?;
        let mut change = 0.0f64;
        for (index, value) in values.into_iter().enumerate() {
            let to = self.couplings[index].to;
            change = change.max(self.write(to, value)?);
        }
        Ok(change)
    }

    /// Copy all coupled outputs to their inputs. Returns the number of sweeps needed, or `None`
    /// when an algebraic loop did not converge.
    fn exchange(&mut self) -> Result<Option<usize>, Error> {
        if !self.has_loop {
            // one sweep in topological order is exact
            self.gauss_seidel_sweep()?;
            return Ok(Some(1));
        }

        for sweep in 1..=self.config.max_iterations {
            let change = match self.config.scheme {
                CouplingScheme::Jacobi => self.jacobi_sweep()?,
                CouplingScheme::GaussSeidel => self.gauss_seidel_sweep()?,
            };
            log::trace!("Exchange sweep {sweep}: largest change {change:e}");
            if change <= self.config.tolerance {
                self.stats.max_sweeps = self.stats.max_sweeps.max(sweep);
                return Ok(Some(sweep));
            }
        }
        log::debug!(
            "Algebraic loop did not converge in {} sweeps: {}",
            self.config.max_iterations,
            self.couplings.iter().map(|coupling| &coupling.name).join(", ")
        );
        Ok(None)
    }
}

/// Resolve `instance.variable` against the units.
fn port(units: &[Box<dyn SimUnit>], path: &str, causality: Causality) -> Result<Port, Error> {
    let (instance, variable) = path
        .split_once('.')
        .ok_or_else(|| Error::System(format!("Expected `instance.variable`, got '{path}'")))?;
    let (index, unit) = units
        .iter()
        .find_position(|unit| unit.instance_name() == instance)
        .ok_or_else(|| Error::System(format!("Unknown unit '{instance}' in '{path}'")))?;
    let var = unit.variable(variable)?;

    if var.get_causality() != causality {
        return Err(Error::System(format!(
            "'{path}' is {:?}, expected {causality:?}",
            var.get_causality()
        )));
    }
    if var.variable_type() != VariableType::Float64 || var.len() != 1 {
        return Err(Error::System(format!(
            "Only scalar Float64 variables can be coupled, '{path}' is {} with {} elements",
            var.variable_type(),
            var.len()
        )));
    }

    Ok(Port {
        unit: index,
        vr: var.value_reference(),
    })
}

fn resolve(units: &[Box<dyn SimUnit>], connection: &Connection) -> Result<Coupling, Error> {
    Ok(Coupling {
        from: port(units, &connection.from, Causality::Output)?,
        to: port(units, &connection.to, Causality::Input)?,
        name: format!("{} -> {}", connection.from, connection.to),
    })
}

/// Order the couplings topologically over the graph of ports, whose edges are the couplings and
/// the direct dependencies of outputs on inputs within a unit. Returns whether the graph contains
/// a cycle.
fn sort_couplings(units: &mut [Box<dyn SimUnit>], couplings: &mut [Coupling]) -> Result<bool, Error> {
    let mut graph = DiGraph::<Port, ()>::new();
    let mut nodes = HashMap::new();
    let mut node = |graph: &mut DiGraph<Port, ()>, port: Port| {
        *nodes.entry(port).or_insert_with(|| graph.add_node(port))
    };

    for coupling in couplings.iter() {
        let from = node(&mut graph, coupling.from);
        let to = node(&mut graph, coupling.to);
        graph.add_edge(from, to, ());
    }

    let outputs = couplings.iter().map(|coupling| coupling.from).unique().collect_vec();
    let inputs = couplings.iter().map(|coupling| coupling.to).unique().collect_vec();
    for output in &outputs {
        let unit = &mut units[output.unit];
        let dependencies = unit
            .get_variable_dependencies(output.vr)
            .or_failed(unit.instance_name())?;
        for input in inputs.iter().filter(|input| input.unit == output.unit) {
            if dependencies.iter().any(|dependency| dependency.independent == input.vr) {
                let (input, output) = (node(&mut graph, *input), node(&mut graph, *output));
                graph.add_edge(input, output, ());
            }
        }
    }

    // tarjan_scc yields the components in reverse topological order
    let components = tarjan_scc(&graph);
    let has_loop = components.iter().any(|component| component.len() > 1);
    let graph = &graph;
    let rank: HashMap<Port, usize> = components
        .iter()
        .rev()
        .enumerate()
        .flat_map(|(rank, component)| component.iter().map(move |&index| (graph[index], rank)))
        .collect();
    couplings.sort_by_key(|coupling| rank.get(&coupling.from).copied().unwrap_or_default());

    Ok(has_loop)
}

/// Co-simulate a system description.
pub fn co_simulate(system: &System) -> Result<(RecordBatch, MasterStats), Error> {
    let mut master = Master::from_system(system)?;
    master.enter_initialization_mode()?;
    for desc in &system.units {
        for (variable, value) in desc.start_values() {
            master.set_start_value(&desc.name, variable, &value)?;
        }
    }
    master.exit_initialization_mode()?;
    master.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(from: &str, to: &str) -> Connection {
        Connection {
            from: from.to_owned(),
            to: to.to_owned(),
        }
    }

    fn units(models: &[(&str, &str)]) -> Vec<Box<dyn SimUnit>> {
        models
            .iter()
            .map(|(model, name)| {
                unit::instantiate(model, name, InterfaceType::CoSimulation, CallbackFunctions::default()).unwrap()
            })
            .collect()
    }

    #[test]
    fn chain_is_sorted() {
        let master = Master::new(
            units(&[("Gain", "c"), ("Gain", "b"), ("Gain", "a")]),
            &[connection("b.y", "c.u"), connection("a.y", "b.u")],
            MasterConfig::default(),
            Experiment::default(),
        )
        .unwrap();
        assert!(!master.has_algebraic_loop());
        let names = master.couplings.iter().map(|coupling| coupling.name.as_str()).collect_vec();
        assert_eq!(names, ["a.y -> b.u", "b.y -> c.u"]);
    }

    #[test]
    fn feedthrough_cycle_is_a_loop() {
        let master = Master::new(
            units(&[("Gain", "a"), ("Gain", "b")]),
            &[connection("a.y", "b.u"), connection("b.y", "a.u")],
            MasterConfig::default(),
            Experiment::default(),
        )
        .unwrap();
        assert!(master.has_algebraic_loop());
    }

    #[test]
    fn cycle_through_states_is_not_a_loop() {
        let master = Master::new(
            units(&[("Integrator", "a"), ("Gain", "b")]),
            &[connection("a.x", "b.u"), connection("b.y", "a.u")],
            MasterConfig::default(),
            Experiment::default(),
        )
        .unwrap();
        assert!(!master.has_algebraic_loop());
    }

    #[test]
    fn invalid_connections() {
        for (connections, models) in [
            (vec![connection("a.u", "b.u")], [("Gain", "a"), ("Gain", "b")]),
            (vec![connection("a.y", "b.y")], [("Gain", "a"), ("Gain", "b")]),
            (vec![connection("a.y", "c.u")], [("Gain", "a"), ("Gain", "b")]),
            (vec![connection("ay", "b.u")], [("Gain", "a"), ("Gain", "b")]),
            (
                vec![connection("a.y", "b.u"), connection("a.y", "b.u")],
                [("Gain", "a"), ("Gain", "b")],
            ),
            (vec![], [("Gain", "a"), ("Gain", "a")]),
            (
                vec![connection("a.Int32_output", "b.u")],
                [("Feedthrough", "a"), ("Gain", "b")],
            ),
        ] {
            assert!(
                matches!(
                    Master::new(units(&models), &connections, MasterConfig::default(), Experiment::default()),
                    Err(Error::System(_))
                ),
                "{connections:?} between {models:?}"
            );
        }
    }
}
