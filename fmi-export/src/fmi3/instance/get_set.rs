use fmi::fmi3::{Fmi3Error, Fmi3Res, GetSet, ValueReference};

use crate::fmi3::{lifecycle::Operation, Model, ModelState};

use super::ModelInstance;

/// Macro to generate getter implementations for ModelInstance
macro_rules! instance_getter {
    ($name:ident, $ty:ty) => {
        paste::paste! {
            fn [<get_ $name>](
                &mut self,
                vrs: &[ValueReference],
                values: &mut [$ty],
            ) -> Result<Fmi3Res, Fmi3Error> {
                self.guarded(Operation::GetVariables, |inst| {
                    let res = inst.update_values()?;
                    inst.context
                        .store()
                        .get_batch(vrs, values)
                        .map_err(|e| inst.context.store_error(e))?;
                    Ok(res)
                })
            }
        }
    };
}

/// Macro to generate setter implementations for ModelInstance
macro_rules! instance_setter {
    ($name:ident, $ty:ty) => {
        paste::paste! {
            fn [<set_ $name>](
                &mut self,
                vrs: &[ValueReference],
                values: &[$ty],
            ) -> Result<Fmi3Res, Fmi3Error> {
                self.guarded(Operation::SetVariables, |inst| {
                    inst.validate_variable_setting(vrs)?;
                    inst.context
                        .store_mut()
                        .set_batch(vrs, values)
                        .map_err(|e| inst.context.store_error(e))?;
                    inst.dynamics.is_dirty_values = true;
                    Ok(Fmi3Res::OK)
                })
            }
        }
    };
}

/// Macro to generate both getter and setter for standard types
macro_rules! instance_getter_setter {
    ($name:ident, $ty:ty) => {
        instance_getter!($name, $ty);
        instance_setter!($name, $ty);
    };
}

impl<M: Model> ModelInstance<M> {
    /// Validate that all variables can be set in the current model state
    fn validate_variable_setting(&self, vrs: &[ValueReference]) -> Result<(), Fmi3Error> {
        if self.state == ModelState::ContinuousTimeMode && self.dynamics.event_mode_required {
            return Err(self.invalid(format_args!(
                "Variables cannot be set before entering the requested event mode"
            )));
        }
        for &vr in vrs {
            let var = self.variable(vr)?;
            if let Err(message) = var.check_settable(self.state) {
                return Err(self.invalid(format_args!(
                    "Variable setting error for {} (VR {vr}): {message}",
                    var.name()
                )));
            }
        }
        Ok(())
    }
}

impl<M: Model> GetSet for ModelInstance<M> {
    instance_getter_setter!(float32, f32);
    instance_getter_setter!(float64, f64);
    instance_getter_setter!(int8, i8);
    instance_getter_setter!(int16, i16);
    instance_getter_setter!(int32, i32);
    instance_getter_setter!(int64, i64);
    instance_getter_setter!(uint8, u8);
    instance_getter_setter!(uint16, u16);
    instance_getter_setter!(uint32, u32);
    instance_getter_setter!(uint64, u64);
    instance_getter_setter!(boolean, bool);

    instance_getter!(string, String);

    fn set_string(&mut self, vrs: &[ValueReference], values: &[&str]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetVariables, |inst| {
            inst.validate_variable_setting(vrs)?;
            let values: Vec<String> = values.iter().map(|&s| s.to_owned()).collect();
            inst.context
                .store_mut()
                .set_batch(vrs, &values)
                .map_err(|e| inst.context.store_error(e))?;
            inst.dynamics.is_dirty_values = true;
            Ok(Fmi3Res::OK)
        })
    }

    fn get_binary(
        &mut self,
        vrs: &[ValueReference],
        sizes: &mut [usize],
        values: &mut [&mut [u8]],
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetVariables, |inst| {
            let res = inst.update_values()?;
            let count = inst
                .context
                .store()
                .element_count(vrs)
                .map_err(|e| inst.context.store_error(e))?;
            if sizes.len() != count || values.len() != count {
                return Err(inst.invalid(format_args!(
                    "get_binary expects {count} sizes and buffers, got {} and {}",
                    sizes.len(),
                    values.len()
                )));
            }

            let mut binaries = vec![Vec::new(); count];
            inst.context
                .store()
                .get_batch(vrs, &mut binaries)
                .map_err(|e| inst.context.store_error(e))?;

            for (size, binary) in sizes.iter_mut().zip(&binaries) {
                *size = binary.len();
            }

            if values
                .iter()
                .zip(&binaries)
                .any(|(buffer, binary)| buffer.len() < binary.len())
            {
                inst.context.log(
                    Fmi3Res::Warning,
                    M::LoggingCategory::default(),
                    format_args!("get_binary buffers too small, required sizes returned"),
                );
                return Ok(Fmi3Res::Warning);
            }

            for (buffer, binary) in values.iter_mut().zip(&binaries) {
                buffer[..binary.len()].copy_from_slice(binary);
            }
            Ok(res)
        })
    }

    fn set_binary(&mut self, vrs: &[ValueReference], values: &[&[u8]]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetVariables, |inst| {
            inst.validate_variable_setting(vrs)?;
            let count = inst
                .context
                .store()
                .element_count(vrs)
                .map_err(|e| inst.context.store_error(e))?;
            if values.len() != count {
                return Err(inst.invalid(format_args!(
                    "set_binary expects {count} values, got {}",
                    values.len()
                )));
            }

            let mut cursor = 0;
            for &vr in vrs {
                let var = inst.variable(vr)?;
                let chunk = &values[cursor..cursor + var.len()];
                cursor += var.len();
                if let Some(max_size) = var.get_max_size() {
                    if let Some(value) = chunk.iter().find(|value| value.len() > max_size) {
                        return Err(inst.invalid(format_args!(
                            "Binary value of {} bytes exceeds max_size {max_size} of {}",
                            value.len(),
                            var.name()
                        )));
                    }
                }
            }

            let values: Vec<Vec<u8>> = values.iter().map(|v| v.to_vec()).collect();
            inst.context
                .store_mut()
                .set_batch(vrs, &values)
                .map_err(|e| inst.context.store_error(e))?;
            inst.dynamics.is_dirty_values = true;
            Ok(Fmi3Res::OK)
        })
    }
}
