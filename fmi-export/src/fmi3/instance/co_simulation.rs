use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use fmi::{
    fmi3::{CoSimulation, Fmi3Error, Fmi3Res, Fmi3Status, StatusKind, StatusValue, ValueReference},
    EventFlags,
};

use super::{event_indicators, indicators_crossed, time_eps, Dynamics, Metadata, ModelContext, ModelInstance};
use crate::{
    fmi3::{
        lifecycle::Operation, traits::ModelLoggingCategory, Causality, Model, ModelState, Variability,
    },
    store::VariableType,
};

/// Upper bound of event iterations at a single time instant.
const MAX_EVENT_ITERATIONS: usize = 100;

/// The copy of the unit a step is computed on. It replaces the instance state only when the
/// step succeeds.
pub(crate) struct StepWork<M: Model> {
    model: M,
    context: ModelContext<M>,
    dynamics: Dynamics,
}

/// An asynchronous step running on a worker thread.
pub(crate) struct PendingStep<M: Model> {
    pub(crate) handle: JoinHandle<(StepWork<M>, Result<Fmi3Res, Fmi3Error>)>,
    pub(crate) cancel: Arc<AtomicBool>,
    description: String,
}

fn combine(res: Fmi3Res, other: Fmi3Res) -> Fmi3Res {
    if res == Fmi3Res::OK {
        other
    } else {
        res
    }
}

/// Overwrite the inputs in `base` with their Taylor extrapolation `dt` after the step start.
fn extrapolate_inputs<M: Model>(
    context: &mut ModelContext<M>,
    derivatives: &BTreeMap<(ValueReference, i32), Vec<f64>>,
    base: &BTreeMap<ValueReference, Vec<f64>>,
    dt: f64,
) -> Result<(), Fmi3Error> {
    for (&vr, base_values) in base {
        let mut values = base_values.clone();
        for (&(_, order), derivative) in derivatives.range((vr, 1)..=(vr, i32::MAX)) {
            let factorial: f64 = (1..=order).map(f64::from).product();
            let coefficient = dt.powi(order) / factorial;
            for (value, d) in values.iter_mut().zip(derivative) {
                *value += coefficient * d;
            }
        }
        context.slice_mut::<f64>(vr)?.copy_from_slice(&values);
    }
    Ok(())
}

/// Iterate `event_update` at the current time until the discrete states converge.
pub(super) fn handle_events<M: Model>(
    model: &mut M,
    context: &mut ModelContext<M>,
    dynamics: &mut Dynamics,
) -> Result<Fmi3Res, Fmi3Error> {
    dynamics.event_flags.reset();
    dynamics.last_event_time = context.time();

    for _ in 0..MAX_EVENT_ITERATIONS {
        let mut flags = EventFlags::default();
        let res = model.event_update(context, &mut flags)?;
        dynamics.event_flags.accumulate(&flags);
        model.calculate_values(context)?;

        if flags.terminate_simulation {
            dynamics.terminate_requested = true;
        }
        if !flags.discrete_states_need_update || flags.terminate_simulation {
            dynamics.pre_event_indicators = event_indicators(model, context)?;
            return Ok(res);
        }
    }

    context.log(
        Fmi3Error::Error,
        M::LoggingCategory::error_category(),
        format_args!("Event iteration did not converge at t = {}", context.time()),
    );
    Err(Fmi3Error::Error)
}

/// Advance `work` from `t` to `t + h` with explicit Euler steps of at most
/// [`Model::FIXED_SOLVER_STEP`], handling state and time events on the way. The step ends early
/// when the unit requests termination.
fn compute_step<M: Model>(
    work: &mut StepWork<M>,
    meta: &Metadata,
    t: f64,
    h: f64,
    cancel: &AtomicBool,
) -> Result<Fmi3Res, Fmi3Error> {
    let StepWork {
        model,
        context,
        dynamics,
    } = work;

    let mut res = model.check_step(context, t, h)?;

    let mut base_inputs = BTreeMap::new();
    for &(vr, _) in dynamics.input_derivatives.keys() {
        if !base_inputs.contains_key(&vr) {
            base_inputs.insert(vr, context.slice::<f64>(vr)?.to_vec());
        }
    }

    let end = t + h;
    let eps = time_eps(end);
    let mut time = t;

    while time < end - eps {
        if cancel.load(Ordering::SeqCst) {
            return Err(Fmi3Error::Error);
        }

        let dt = if end - time <= M::FIXED_SOLVER_STEP + eps {
            end - time
        } else {
            M::FIXED_SOLVER_STEP
        };

        extrapolate_inputs(context, &dynamics.input_derivatives, &base_inputs, time - t)?;
        res = combine(res, model.calculate_values(context)?);

        let mut next_states = Vec::with_capacity(meta.states.len());
        for cs in &meta.states {
            let x = context.slice::<f64>(cs.state)?;
            let der_x = context.slice::<f64>(cs.derivative)?;
            next_states.push(x.iter().zip(der_x).map(|(x, dx)| x + dt * dx).collect::<Vec<_>>());
        }
        for (cs, x) in meta.states.iter().zip(next_states) {
            context.slice_mut::<f64>(cs.state)?.copy_from_slice(&x);
        }

        time = if end - (time + dt) <= eps { end } else { time + dt };
        context.set_time(time);
        dynamics.num_steps += 1;

        extrapolate_inputs(context, &dynamics.input_derivatives, &base_inputs, time - t)?;
        res = combine(res, model.calculate_values(context)?);

        let indicators = event_indicators(model, context)?;
        let state_event = indicators_crossed(&dynamics.pre_event_indicators, &indicators);
        let time_event = dynamics
            .event_flags
            .next_event_time
            .is_some_and(|next| time >= next - time_eps(next));
        dynamics.pre_event_indicators = indicators;

        if state_event || time_event {
            res = combine(res, handle_events(model, context, dynamics)?);
            if dynamics.terminate_requested {
                context.log(
                    Fmi3Res::OK,
                    M::LoggingCategory::event_category(),
                    format_args!("Unit requested termination at t = {time}"),
                );
                break;
            }
        }
    }

    // inputs keep the values set by the importer
    for (vr, values) in &base_inputs {
        context.slice_mut::<f64>(*vr)?.copy_from_slice(values);
    }
    dynamics.input_derivatives.clear();
    dynamics.last_successful_time = time;
    dynamics.is_dirty_values = true;
    Ok(res)
}

impl<M: Model> ModelInstance<M> {
    /// Commit a finished step, or record a rejected one.
    fn finish_step(&mut self, work: StepWork<M>, res: Result<Fmi3Res, Fmi3Error>) -> Result<Fmi3Res, Fmi3Error> {
        match res {
            Ok(step_res) => {
                self.model = work.model;
                self.context.adopt_values(work.context);
                self.dynamics = work.dynamics;
            }
            Err(Fmi3Error::Discard) => {
                self.context.log(
                    Fmi3Error::Discard,
                    M::LoggingCategory::error_category(),
                    format_args!(
                        "Step from t = {} discarded",
                        self.dynamics.last_successful_time
                    ),
                );
            }
            Err(_) => {}
        }
        self.dynamics.last_step_status = res.into();
        res
    }

    /// Collect the result of a finished asynchronous step.
    fn poll_pending(&mut self) {
        if !self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.handle.is_finished())
        {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        self.state = ModelState::StepMode;
        match pending.handle.join() {
            Ok((work, res)) => {
                if let Err(err @ (Fmi3Error::Error | Fmi3Error::Fatal)) = self.finish_step(work, res) {
                    self.fail(Operation::DoStep, err);
                }
            }
            Err(_) => {
                self.context.log(
                    Fmi3Error::Error,
                    M::LoggingCategory::error_category(),
                    format_args!("Asynchronous step panicked"),
                );
                self.dynamics.last_step_status = Fmi3Status::Error;
                self.state = ModelState::Error;
            }
        }
    }
}

impl<M: Model> CoSimulation for ModelInstance<M> {
    fn set_input_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &[f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::SetInputDerivatives, |inst| {
            if orders.len() != vrs.len() {
                return Err(inst.invalid(format_args!(
                    "{} value references, but {} orders",
                    vrs.len(),
                    orders.len()
                )));
            }

            let mut updates = Vec::with_capacity(vrs.len());
            let mut cursor = 0;
            for (&vr, &order) in vrs.iter().zip(orders) {
                let var = inst.variable(vr)?;
                if var.get_causality() != Causality::Input
                    || var.variable_type() != VariableType::Float64
                    || var.get_variability() != Variability::Continuous
                {
                    return Err(inst.invalid(format_args!(
                        "{} is not a continuous Float64 input",
                        var.name()
                    )));
                }
                if !(0..=M::MAX_INPUT_DERIVATIVE_ORDER).contains(&order) {
                    return Err(inst.invalid(format_args!(
                        "Derivative order {order} of {} is not supported",
                        var.name()
                    )));
                }
                let n = var.len();
                if cursor + n > values.len() {
                    break;
                }
                updates.push((vr, order, &values[cursor..cursor + n]));
                cursor += n;
            }
            if updates.len() != vrs.len() || cursor != values.len() {
                return Err(inst.invalid(format_args!(
                    "{} values do not match the requested input derivatives",
                    values.len()
                )));
            }

            for (vr, order, values) in updates {
                if order == 0 {
                    inst.context.slice_mut::<f64>(vr)?.copy_from_slice(values);
                    inst.dynamics.is_dirty_values = true;
                } else {
                    inst.dynamics.input_derivatives.insert((vr, order), values.to_vec());
                }
            }
            Ok(Fmi3Res::OK)
        })
    }

    fn get_output_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::GetOutputDerivatives, |inst| {
            if orders.len() != vrs.len() {
                return Err(inst.invalid(format_args!(
                    "{} value references, but {} orders",
                    vrs.len(),
                    orders.len()
                )));
            }

            let mut layout = Vec::with_capacity(vrs.len());
            let mut cursor = 0;
            for (&vr, &order) in vrs.iter().zip(orders) {
                let var = inst.variable(vr)?;
                if var.get_causality() != Causality::Output || var.variable_type() != VariableType::Float64 {
                    return Err(inst.invalid(format_args!("{} is not a Float64 output", var.name())));
                }
                if !(0..=M::MAX_OUTPUT_DERIVATIVE_ORDER).contains(&order) {
                    return Err(inst.invalid(format_args!(
                        "Derivative order {order} of {} is not supported",
                        var.name()
                    )));
                }
                layout.push((vr, order, cursor..cursor + var.len()));
                cursor += var.len();
            }
            if cursor != values.len() {
                return Err(inst.invalid(format_args!(
                    "Expected {cursor} values, got {}",
                    values.len()
                )));
            }

            let mut res = inst.update_values()?;
            for (vr, order, range) in layout {
                let dst = &mut values[range];
                if order == 0 {
                    dst.copy_from_slice(inst.context.slice::<f64>(vr)?);
                } else {
                    res = combine(
                        res,
                        inst.model.get_output_derivative(&inst.context, vr, order, dst)?,
                    );
                }
            }
            Ok(res)
        })
    }

    fn do_step(
        &mut self,
        current_communication_point: f64,
        communication_step_size: f64,
        _no_set_fmu_state_prior_to_current_point: bool,
    ) -> Result<Fmi3Res, Fmi3Error> {
        let (t, h) = (current_communication_point, communication_step_size);
        self.guarded(Operation::DoStep, |inst| {
            if inst.dynamics.terminate_requested {
                return Err(inst.invalid(format_args!("The unit requested termination")));
            }
            if h <= 0.0 || h.is_nan() {
                return Err(inst.invalid(format_args!(
                    "Communication step size must be positive, got {h}"
                )));
            }
            let time = inst.context.time();
            if (t - time).abs() > time_eps(time) {
                return Err(inst.invalid(format_args!(
                    "Communication point {t} does not match the unit time {time}"
                )));
            }
            if let Some(stop) = inst.context.stop_time().filter(|&stop| t + h > stop + time_eps(stop)) {
                return Err(inst.invalid(format_args!(
                    "Step to {} exceeds the stop time {stop}",
                    t + h
                )));
            }

            let mut work = StepWork {
                model: inst.model.clone(),
                context: inst.context.clone(),
                dynamics: inst.dynamics.clone(),
            };

            match inst.callbacks.step_finished.clone() {
                Some(step_finished) if M::CAN_RUN_ASYNCHRONOUSLY => {
                    let cancel = Arc::new(AtomicBool::new(false));
                    let flag = cancel.clone();
                    let meta = inst.meta.clone();
                    let name = inst.context.instance_name().to_owned();
                    let handle = thread::spawn(move || {
                        let res = compute_step(&mut work, &meta, t, h, &flag);
                        if !flag.load(Ordering::SeqCst) {
                            step_finished(&name, res.into());
                        }
                        (work, res)
                    });

                    inst.pending = Some(PendingStep {
                        handle,
                        cancel,
                        description: format!("do_step from {t} to {}", t + h),
                    });
                    inst.state = ModelState::StepInProgress;
                    inst.dynamics.last_step_status = Fmi3Status::Pending;
                    Ok(Fmi3Res::Pending)
                }
                _ => {
                    let res = compute_step(&mut work, &inst.meta, t, h, &AtomicBool::new(false));
                    inst.finish_step(work, res)
                }
            }
        })
    }

    fn cancel_step(&mut self) -> Result<Fmi3Res, Fmi3Error> {
        self.guarded(Operation::CancelStep, |inst| {
            if let Some(pending) = inst.pending.take() {
                pending.cancel.store(true, Ordering::SeqCst);
                if pending.handle.join().is_err() {
                    log::warn!("Cancelled step of {} panicked", inst.context.instance_name());
                }
            }
            inst.dynamics.last_step_status = Fmi3Status::Discard;
            inst.state = ModelState::StepCanceled;
            Ok(Fmi3Res::OK)
        })
    }

    fn get_status(&mut self, kind: StatusKind) -> Result<StatusValue, Fmi3Error> {
        self.guarded(Operation::GetStatus, |inst| {
            inst.poll_pending();
            Ok(match kind {
                StatusKind::DoStepStatus => StatusValue::Status(inst.dynamics.last_step_status),
                StatusKind::PendingStatus => StatusValue::String(
                    inst.pending
                        .as_ref()
                        .map(|pending| pending.description.clone())
                        .unwrap_or_default(),
                ),
                StatusKind::LastSuccessfulTime => StatusValue::Double(inst.dynamics.last_successful_time),
                StatusKind::Terminated => StatusValue::Bool(inst.dynamics.terminate_requested),
            })
        })
    }
}
