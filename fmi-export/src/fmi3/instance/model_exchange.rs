use fmi::{
    fmi3::{Fmi3Error, Fmi3Res, ModelExchange},
    EventFlags,
};

use super::{event_indicators, indicators_crossed, time_eps, ModelInstance};
use crate::fmi3::{lifecycle::Operation, traits::ModelLoggingCategory, Model, ModelState};

impl<M: Model> ModelInstance<M> {
    /// Continuous-time operations are blocked until a requested event mode is entered.
    fn ensure_no_pending_event(&self, op: Operation) -> Result<(), Fmi3Error> {
        if self.dynamics.event_mode_required {
            return Err(self.invalid(format_args!(
                "{op:?} called while event mode is required"
            )));
        }
        Ok(())
    }

    fn check_state_vector_len(&self, len: usize) -> Result<(), Fmi3Error> {
        if len != self.meta.num_states() {
            return Err(self.invalid(format_args!(
                "Expected {} continuous states, got {len}",
                self.meta.num_states()
            )));
        }
        Ok(())
    }

    /// Copy the state vector (or, with `derivatives`, its time derivative) into `values`.
    fn read_state_vector(&self, values: &mut [f64], derivatives: bool) -> Result<(), Fmi3Error> {
        let mut cursor = 0;
        for cs in &self.meta.states {
            let vr = if derivatives { cs.derivative } else { cs.state };
            let src = self.context.slice::<f64>(vr)?;
            values[cursor..cursor + src.len()].copy_from_slice(src);
            cursor += src.len();
        }
        Ok(())
    }
}

impl<M: Model> ModelExchange for ModelInstance<M> {
    fn enter_event_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::EnterEventMode, |inst| {
            inst.state = ModelState::EventMode;
            inst.dynamics.event_mode_required = false;
            inst.dynamics.discrete_states_converged = false;
            inst.dynamics.last_event_time = inst.context.time();
            inst.dynamics.event_flags.reset();
            Ok(Fmi3Res::OK)
        })
    }

    fn new_discrete_states(&mut self, event_flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::NewDiscreteStates, |inst| {
            inst.update_values()?;

            let mut flags = EventFlags::default();
            let res = inst.model.event_update(&mut inst.context, &mut flags)?;
            inst.dynamics.is_dirty_values = true;
            inst.dynamics.discrete_states_converged = !flags.discrete_states_need_update;
            inst.dynamics.event_flags.accumulate(&flags);
            if flags.terminate_simulation {
                inst.dynamics.terminate_requested = true;
            }

            inst.context.log(
                res,
                M::LoggingCategory::event_category(),
                format_args!("new_discrete_states at t = {}: {flags:?}", inst.context.time()),
            );

            *event_flags = flags;
            Ok(res)
        })
    }

    fn enter_continuous_time_mode(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::EnterContinuousTimeMode, |inst| {
            if !inst.dynamics.discrete_states_converged {
                return Err(inst.invalid(format_args!(
                    "new_discrete_states has not reached a fixpoint"
                )));
            }
            if inst.dynamics.terminate_requested {
                return Err(inst.invalid(format_args!("The unit requested termination")));
            }
            inst.update_values()?;
            inst.dynamics.pre_event_indicators = event_indicators(&mut inst.model, &inst.context)?;
            inst.state = ModelState::ContinuousTimeMode;
            Ok(Fmi3Res::OK)
        })
    }

    fn completed_integrator_step(
        &mut self,
        _no_set_fmu_state_prior: bool,
        enter_event_mode: &mut bool,
        terminate_simulation: &mut bool,
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::CompletedIntegratorStep, |inst| {
            inst.ensure_no_pending_event(Operation::CompletedIntegratorStep)?;
            inst.update_values()?;

            let indicators = event_indicators(&mut inst.model, &inst.context)?;
            let state_event = indicators_crossed(&inst.dynamics.pre_event_indicators, &indicators);
            let time = inst.context.time();
            let time_event = inst
                .dynamics
                .event_flags
                .next_event_time
                .is_some_and(|next| time >= next - time_eps(next));

            inst.dynamics.pre_event_indicators = indicators;
            inst.dynamics.event_mode_required = state_event || time_event;
            inst.dynamics.num_steps += 1;

            *enter_event_mode = inst.dynamics.event_mode_required;
            *terminate_simulation = inst.dynamics.terminate_requested;
            Ok(Fmi3Res::OK)
        })
    }

    fn set_time(&mut self, time: f64) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetTime, |inst| {
            inst.ensure_no_pending_event(Operation::SetTime)?;
            if time < inst.dynamics.last_event_time {
                return Err(inst.invalid(format_args!(
                    "set_time({time}) is before the last event at {}",
                    inst.dynamics.last_event_time
                )));
            }
            inst.context.set_time(time);
            inst.dynamics.is_dirty_values = true;
            Ok(Fmi3Res::OK)
        })
    }

    fn set_continuous_states(&mut self, states: &[f64]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetContinuousStates, |inst| {
            inst.ensure_no_pending_event(Operation::SetContinuousStates)?;
            inst.check_state_vector_len(states.len())?;
            let mut cursor = 0;
            for cs in &inst.meta.states {
                let dst = inst.context.slice_mut::<f64>(cs.state)?;
                let n = dst.len();
                dst.copy_from_slice(&states[cursor..cursor + n]);
                cursor += n;
            }
            inst.dynamics.is_dirty_values = true;
            Ok(Fmi3Res::OK)
        })
    }

    fn get_continuous_states(&mut self, continuous_states: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetContinuousStates, |inst| {
            inst.check_state_vector_len(continuous_states.len())?;
            inst.read_state_vector(continuous_states, false)?;
            Ok(Fmi3Res::OK)
        })
    }

    fn get_derivatives(&mut self, derivatives: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetDerivatives, |inst| {
            inst.check_state_vector_len(derivatives.len())?;
            let res = inst.update_values()?;
            inst.read_state_vector(derivatives, true)?;
            Ok(res)
        })
    }

    fn get_event_indicators(&mut self, indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetEventIndicators, |inst| {
            if indicators.len() != M::NUM_EVENT_INDICATORS {
                return Err(inst.invalid(format_args!(
                    "Expected {} event indicators, got {}",
                    M::NUM_EVENT_INDICATORS,
                    indicators.len()
                )));
            }
            inst.update_values()?;
            if indicators.is_empty() {
                return Ok(Fmi3Res::OK);
            }
            inst.model.get_event_indicators(&inst.context, indicators)
        })
    }

    fn get_nominals_of_continuous_states(&mut self, nominals: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetNominalsOfContinuousStates, |inst| {
            inst.check_state_vector_len(nominals.len())?;
            nominals.copy_from_slice(&inst.meta.nominals);
            Ok(Fmi3Res::OK)
        })
    }

    fn get_number_of_event_indicators(&mut self) -> Result<usize, Fmi3Error> {
        self.guarded(Operation::GetNumberOfEventIndicators, |_| Ok(M::NUM_EVENT_INDICATORS))
    }

    fn get_number_of_continuous_states(&mut self) -> Result<usize, Fmi3Error> {
        self.guarded(Operation::GetNumberOfContinuousStates, |inst| Ok(inst.meta.num_states()))
    }
}
