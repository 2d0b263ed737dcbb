//! Type-erased access to the units a simulation drives.
//!
//! The drivers and the master work on `Box<dyn SimUnit>`, so a system can mix units of different
//! model types. [`SimUnit`] is implemented for every [`ModelInstance`] and forwards to the `fmi`
//! traits.

use std::{any::Any, sync::Arc};

use fmi::{
    fmi3::{
        CallbackFunctions, CoSimulation, Common, Fmi3Error, Fmi3Res, Fmi3Status, GetSet, ModelExchange,
        StatusKind, StatusValue, StepFinishedCallback, ValueReference, VariableDependency,
    },
    EventFlags, InterfaceType,
};
use fmi_export::{
    fmi3::{DefaultExperiment, FmuState, Model, ModelInstance, ModelVariable},
    store::VariableType,
};
use fmi_test_data::{BouncingBall, Dahlquist, Feedthrough, Gain, Integrator};

use crate::Error;

/// An owned snapshot of a unit, restorable into the unit it was taken from.
pub struct UnitState(Box<dyn Any + Send>);

/// A unit instance as seen by the simulation drivers.
pub trait SimUnit: GetSet + Send {
    fn instance_name(&self) -> &str;
    fn model_name(&self) -> &'static str;
    fn default_experiment(&self) -> DefaultExperiment;
    /// The variables of the unit, excluding `time`.
    fn variables(&self) -> Vec<ModelVariable>;

    fn setup_experiment(&mut self, tolerance: Option<f64>, start_time: f64, stop_time: Option<f64>)
        -> Result<Fmi3Res, Fmi3Error>;
    fn enter_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn exit_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn terminate(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn get_variable_dependencies(&mut self, dependent: ValueReference) -> Result<Vec<VariableDependency>, Fmi3Error>;
    fn get_state(&mut self) -> Result<UnitState, Fmi3Error>;
    fn set_state(&mut self, state: &UnitState) -> Result<Fmi3Res, Fmi3Error>;

    // Model Exchange
    fn enter_event_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn new_discrete_states(&mut self, event_flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error>;
    fn enter_continuous_time_mode(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn completed_integrator_step(
        &mut self,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut bool,
        terminate_simulation: &mut bool,
    ) -> Result<Fmi3Res, Fmi3Error>;
    fn set_time(&mut self, time: f64) -> Result<Fmi3Res, Fmi3Error>;
    fn set_continuous_states(&mut self, states: &[f64]) -> Result<Fmi3Res, Fmi3Error>;
    fn get_continuous_states(&mut self, states: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;
    fn get_derivatives(&mut self, derivatives: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;
    fn get_event_indicators(&mut self, indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error>;
    fn get_number_of_continuous_states(&mut self) -> Result<usize, Fmi3Error>;
    fn get_number_of_event_indicators(&mut self) -> Result<usize, Fmi3Error>;

    // Co-Simulation
    fn do_step(&mut self, current_communication_point: f64, communication_step_size: f64)
        -> Result<Fmi3Res, Fmi3Error>;
    fn cancel_step(&mut self) -> Result<Fmi3Res, Fmi3Error>;
    fn get_status(&mut self, kind: StatusKind) -> Result<StatusValue, Fmi3Error>;

    /// The status of the running or last finished step.
    fn step_status(&mut self) -> Result<Fmi3Status, Fmi3Error> {
        match self.get_status(StatusKind::DoStepStatus)? {
            StatusValue::Status(status) => Ok(status),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Whether the unit requested the end of the simulation.
    fn terminated(&mut self) -> Result<bool, Fmi3Error> {
        match self.get_status(StatusKind::Terminated)? {
            StatusValue::Bool(terminated) => Ok(terminated),
            _ => Err(Fmi3Error::Error),
        }
    }

    fn last_successful_time(&mut self) -> Result<f64, Fmi3Error> {
        match self.get_status(StatusKind::LastSuccessfulTime)? {
            StatusValue::Double(time) => Ok(time),
            _ => Err(Fmi3Error::Error),
        }
    }

    /// Look up a variable by name.
    fn variable(&self, name: &str) -> Result<ModelVariable, Error> {
        self.variables()
            .into_iter()
            .find(|var| var.name() == name)
            .ok_or_else(|| Error::UnknownVariable {
                unit: self.instance_name().to_owned(),
                variable: name.to_owned(),
            })
    }
}

impl<M: Model> SimUnit for ModelInstance<M> {
    fn instance_name(&self) -> &str {
        ModelInstance::instance_name(self)
    }

    fn model_name(&self) -> &'static str {
        M::MODEL_NAME
    }

    fn default_experiment(&self) -> DefaultExperiment {
        M::DEFAULT_EXPERIMENT
    }

    fn variables(&self) -> Vec<ModelVariable> {
        ModelInstance::variables(self)
            .filter(|var| var.value_reference() != 0)
            .cloned()
            .collect()
    }

    fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<Fmi3Res, Fmi3Error> {
        Common::setup_experiment(self, tolerance, start_time, stop_time)
    }

    fn enter_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        Common::enter_initialization_mode(self)
    }

    fn exit_initialization_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        Common::exit_initialization_mode(self)
    }

    fn terminate(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        Common::terminate(self)
    }

    fn get_variable_dependencies(&mut self, dependent: ValueReference) -> Result<Vec<VariableDependency>, Fmi3Error> {
        Common::get_variable_dependencies(self, dependent)
    }

    fn get_state(&mut self) -> Result<UnitState, Fmi3Error> {
        Common::get_fmu_state(self).map(|state| UnitState(Box::new(state)))
    }

    fn set_state(&mut self, state: &UnitState) -> Result<Fmi3Res, Fmi3Error> {
        let state = state.0.downcast_ref::<FmuState<M>>().ok_or(Fmi3Error::Error)?;
        Common::set_fmu_state(self, state)
    }

    fn enter_event_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::enter_event_mode(self)
    }

    fn new_discrete_states(&mut self, event_flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::new_discrete_states(self, event_flags)
    }

    fn enter_continuous_time_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::enter_continuous_time_mode(self)
    }

    fn completed_integrator_step(
        &mut self,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut bool,
        terminate_simulation: &mut bool,
    ) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::completed_integrator_step(self, no_set_fmu_state_prior, enter_event_mode, terminate_simulation)
    }

    fn set_time(&mut self, time: f64) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::set_time(self, time)
    }

    fn set_continuous_states(&mut self, states: &[f64]) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::set_continuous_states(self, states)
    }

    fn get_continuous_states(&mut self, states: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::get_continuous_states(self, states)
    }

    fn get_derivatives(&mut self, derivatives: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::get_derivatives(self, derivatives)
    }

    fn get_event_indicators(&mut self, indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        ModelExchange::get_event_indicators(self, indicators)
    }

    fn get_number_of_continuous_states(&mut self) -> Result<usize, Fmi3Error> {
        ModelExchange::get_number_of_continuous_states(self)
    }

    fn get_number_of_event_indicators(&mut self) -> Result<usize, Fmi3Error> {
        ModelExchange::get_number_of_event_indicators(self)
    }

    fn do_step(
        &mut self,
        current_communication_point: f64,
        communication_step_size: f64,
    ) -> Result<Fmi3Res, Fmi3Error> {
        CoSimulation::do_step(self, current_communication_point, communication_step_size, true)
    }

    fn cancel_step(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        CoSimulation::cancel_step(self)
    }

    fn get_status(&mut self, kind: StatusKind) -> Result<StatusValue, Fmi3Error> {
        CoSimulation::get_status(self, kind)
    }
}

fn instantiate_model<M: Model>(
    instance_name: &str,
    interface_type: InterfaceType,
    callbacks: CallbackFunctions,
) -> Result<Box<dyn SimUnit>, Error> {
    let inst = ModelInstance::<M>::instantiate(
        instance_name,
        interface_type,
        M::INSTANTIATION_TOKEN,
        None,
        callbacks,
        false,
        log::log_enabled!(log::Level::Debug),
    )?;
    Ok(Box::new(inst))
}

/// Instantiate one of the reference units of [`fmi_test_data`] by its model name.
pub fn instantiate(
    model_name: &str,
    instance_name: &str,
    interface_type: InterfaceType,
    callbacks: CallbackFunctions,
) -> Result<Box<dyn SimUnit>, Error> {
    match model_name {
        "BouncingBall" => instantiate_model::<BouncingBall>(instance_name, interface_type, callbacks),
        "Dahlquist" => instantiate_model::<Dahlquist>(instance_name, interface_type, callbacks),
        "Feedthrough" => instantiate_model::<Feedthrough>(instance_name, interface_type, callbacks),
        "Gain" => instantiate_model::<Gain>(instance_name, interface_type, callbacks),
        "Integrator" => instantiate_model::<Integrator>(instance_name, interface_type, callbacks),
        _ => Err(Error::UnknownModel(model_name.to_owned())),
    }
}

/// Callbacks that let units step asynchronously, logging each completed step.
pub fn async_callbacks() -> CallbackFunctions {
    let step_finished: StepFinishedCallback = Arc::new(|instance_name: &str, status: Fmi3Status| {
        log::debug!("{instance_name}: asynchronous step finished with {status}");
    });
    CallbackFunctions {
        step_finished: Some(step_finished),
        ..Default::default()
    }
}

/// Attach the unit name to a failed call.
pub(crate) trait UnitResult<T> {
    fn or_failed(self, unit: &str) -> Result<T, Error>;
}

impl<T> UnitResult<T> for Result<T, Fmi3Error> {
    fn or_failed(self, unit: &str) -> Result<T, Error> {
        self.map_err(|err| Error::UnitFailed {
            unit: unit.to_owned(),
            status: err.into(),
        })
    }
}

fn parse_all<T: std::str::FromStr>(var: &ModelVariable, value: &str) -> Result<Vec<T>, Error> {
    let values = value
        .split(',')
        .map(|item| item.trim().parse::<T>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Error::StartValue(format!("{}={value}", var.name())))?;
    if values.len() != var.len() {
        return Err(Error::StartValue(format!(
            "{} has {} elements, got {}",
            var.name(),
            var.len(),
            values.len()
        )));
    }
    Ok(values)
}

fn parse_bool(var: &ModelVariable, value: &str) -> Result<Vec<bool>, Error> {
    value
        .split(',')
        .map(|item| match item.trim() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(Error::StartValue(format!("{}={value}", var.name()))),
        })
        .collect()
}

fn parse_hex(var: &ModelVariable, value: &str) -> Result<Vec<u8>, Error> {
    let invalid = || Error::StartValue(format!("{}={value}", var.name()));
    if value.len() % 2 != 0 {
        return Err(invalid());
    }
    (0..value.len())
        .step_by(2)
        .map(|i| {
            value
                .get(i..i + 2)
                .and_then(|byte| u8::from_str_radix(byte, 16).ok())
                .ok_or_else(invalid)
        })
        .collect()
}

/// Set a variable from its textual form, as given on the command line or in a system description.
///
/// Array elements are separated by commas, booleans are `0`/`1`/`true`/`false`, strings may be
/// quoted with `'` and binaries are hexadecimal.
pub fn set_start_value(unit: &mut dyn SimUnit, name: &str, value: &str) -> Result<(), Error> {
    let var = unit.variable(name)?;
    let vr = [var.value_reference()];
    let unit_name = unit.instance_name().to_owned();
    let res = match var.variable_type() {
        VariableType::Float32 => unit.set_float32(&vr, &parse_all(&var, value)?),
        VariableType::Float64 => unit.set_float64(&vr, &parse_all(&var, value)?),
        VariableType::Int8 => unit.set_int8(&vr, &parse_all(&var, value)?),
        VariableType::Int16 => unit.set_int16(&vr, &parse_all(&var, value)?),
        VariableType::Int32 => unit.set_int32(&vr, &parse_all(&var, value)?),
        VariableType::Int64 => unit.set_int64(&vr, &parse_all(&var, value)?),
        VariableType::UInt8 => unit.set_uint8(&vr, &parse_all(&var, value)?),
        VariableType::UInt16 => unit.set_uint16(&vr, &parse_all(&var, value)?),
        VariableType::UInt32 => unit.set_uint32(&vr, &parse_all(&var, value)?),
        VariableType::UInt64 => unit.set_uint64(&vr, &parse_all(&var, value)?),
        VariableType::Boolean => unit.set_boolean(&vr, &parse_bool(&var, value)?),
        VariableType::String => unit.set_string(&vr, &[value.trim_matches('\'')]),
        VariableType::Binary => unit.set_binary(&vr, &[parse_hex(&var, value)?.as_slice()]),
    };
    log::trace!("{unit_name}: {name} = {value}");
    res.map(|_| ()).or_failed(&unit_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedthrough() -> Box<dyn SimUnit> {
        instantiate(
            "Feedthrough",
            "ft",
            InterfaceType::CoSimulation,
            CallbackFunctions::default(),
        )
        .unwrap()
    }

    #[test]
    fn unknown_model() {
        assert!(matches!(
            instantiate("Nope", "x", InterfaceType::CoSimulation, CallbackFunctions::default()),
            Err(Error::UnknownModel(_))
        ));
    }

    #[test]
    fn start_values_of_every_kind() {
        let mut unit = feedthrough();
        unit.setup_experiment(None, 0.0, None).unwrap();
        unit.enter_initialization_mode().unwrap();
        for (name, value) in [
            ("Float64_continuous_input", "-5e-1"),
            ("Int32_input", "2147483647"),
            ("Boolean_input", "1"),
            ("String_parameter", "'FMI is awesome!'"),
            ("UInt64_input", "18446744073709551615"),
            ("Binary_input", "42696E617279"),
            ("Float64_array_input", "1, 2, 3"),
        ] {
            set_start_value(unit.as_mut(), name, value).unwrap();
        }

        let mut strings = [String::new()];
        unit.get_string(&[29], &mut strings).unwrap();
        assert_eq!(strings[0], "FMI is awesome!");
        let mut array = [0.0; 3];
        unit.get_float64(&[32], &mut array).unwrap();
        assert_eq!(array, [1.0, 2.0, 3.0]);
        let mut sizes = [0];
        let mut binary = [0u8; 16];
        unit.get_binary(&[30], &mut sizes, &mut [&mut binary[..]]).unwrap();
        assert_eq!(&binary[..sizes[0]], b"Binary");
    }

    #[test]
    fn invalid_start_values() {
        let mut unit = feedthrough();
        assert!(matches!(
            set_start_value(unit.as_mut(), "Int8_input", "1000"),
            Err(Error::StartValue(_))
        ));
        assert!(matches!(
            set_start_value(unit.as_mut(), "Float64_array_input", "1, 2"),
            Err(Error::StartValue(_))
        ));
        assert!(matches!(
            set_start_value(unit.as_mut(), "Binary_input", "4"),
            Err(Error::StartValue(_))
        ));
        assert!(matches!(
            set_start_value(unit.as_mut(), "missing", "1"),
            Err(Error::UnknownVariable { .. })
        ));
    }

    #[test]
    fn snapshots_of_other_units_are_rejected() {
        let mut a = feedthrough();
        let mut b = instantiate(
            "Dahlquist",
            "d",
            InterfaceType::CoSimulation,
            CallbackFunctions::default(),
        )
        .unwrap();
        for unit in [&mut a, &mut b] {
            unit.setup_experiment(None, 0.0, None).unwrap();
            unit.enter_initialization_mode().unwrap();
        }
        let state = a.get_state().unwrap();
        assert_eq!(b.set_state(&state), Err(Fmi3Error::Error));
        assert!(a.set_state(&state).is_ok());
    }
}
