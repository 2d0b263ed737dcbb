#![allow(dead_code)]

use fmi::{
    fmi3::{CallbackFunctions, Common, Fmi3Error, Fmi3Res, ValueReference},
    EventFlags, InterfaceType,
};
use fmi_export::fmi3::{
    Causality, ContinuousState, DefaultLoggingCategory, Model, ModelContext, ModelInstance,
    ModelVariable, UserModel, Variability,
};

/// Integrates its input, `der(x) = u`, and counts the whole units `x` passed.
///
/// * VR 1 `u`: continuous input
/// * VR 2 `x`: state output
/// * VR 3 `der(x)`
/// * VR 4 `v`: input vector of 3
/// * VR 5 `s`: scalar input
/// * VR 6 `max_step`: steps larger than this are discarded
/// * VR 7 `count`: discrete output, the number of whole units passed
#[derive(Default, Debug, Clone)]
pub struct Ramp;

impl UserModel for Ramp {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        let u: f64 = ctx.get(1)?;
        ctx.set(3, u)?;
        Ok(Fmi3Res::OK)
    }

    fn event_update(&mut self, ctx: &mut ModelContext<Self>, flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error> {
        flags.reset();
        let level = ctx.get::<f64>(2)?.floor() as i32;
        if level != ctx.get::<i32>(7)? {
            ctx.set(7, level)?;
        }
        Ok(Fmi3Res::OK)
    }

    fn get_event_indicators(&mut self, ctx: &ModelContext<Self>, indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        indicators[0] = ctx.get::<f64>(2)? - f64::from(ctx.get::<i32>(7)? + 1);
        Ok(Fmi3Res::OK)
    }

    fn check_step(&mut self, ctx: &ModelContext<Self>, _t: f64, h: f64) -> Result<Fmi3Res, Fmi3Error> {
        if h > ctx.get::<f64>(6)? {
            return Err(Fmi3Error::Discard);
        }
        Ok(Fmi3Res::OK)
    }

    fn get_output_derivative(
        &mut self,
        ctx: &ModelContext<Self>,
        vr: ValueReference,
        order: i32,
        values: &mut [f64],
    ) -> Result<Fmi3Res, Fmi3Error> {
        match (vr, order) {
            (2, 1) => values[0] = ctx.get(1)?,
            _ => return Err(Fmi3Error::Error),
        }
        Ok(Fmi3Res::OK)
    }
}

impl Model for Ramp {
    const MODEL_NAME: &'static str = "Ramp";
    const INSTANTIATION_TOKEN: &'static str = "{8c4e810f-3df3-4a00-8276-176fa3c9f000}";
    const NUM_EVENT_INDICATORS: usize = 1;
    const MAX_INPUT_DERIVATIVE_ORDER: i32 = 1;
    const MAX_OUTPUT_DERIVATIVE_ORDER: i32 = 1;
    const CAN_RUN_ASYNCHRONOUSLY: bool = true;

    fn model_variables() -> Vec<ModelVariable> {
        vec![
            ModelVariable::new("u", 1, 0.0).causality(Causality::Input),
            ModelVariable::new("x", 2, 0.0).causality(Causality::Output),
            ModelVariable::new("der(x)", 3, 0.0),
            ModelVariable::new("v", 4, [1.0, 2.0, 3.0]).causality(Causality::Input),
            ModelVariable::new("s", 5, 0.0).causality(Causality::Input),
            ModelVariable::new("max_step", 6, 1.0)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
            ModelVariable::new("count", 7, 0i32).causality(Causality::Output),
        ]
    }

    fn continuous_states() -> Vec<ContinuousState> {
        vec![ContinuousState::new(2, 3)]
    }
}

/// Fails irrecoverably on the first step after `boom` was set.
#[derive(Default, Debug, Clone)]
pub struct Fragile;

impl UserModel for Fragile {
    type LoggingCategory = DefaultLoggingCategory;

    fn check_step(&mut self, ctx: &ModelContext<Self>, _t: f64, _h: f64) -> Result<Fmi3Res, Fmi3Error> {
        if ctx.get::<bool>(1)? {
            return Err(Fmi3Error::Fatal);
        }
        Ok(Fmi3Res::OK)
    }
}

impl Model for Fragile {
    const MODEL_NAME: &'static str = "Fragile";
    const INSTANTIATION_TOKEN: &'static str = "{fragile}";
    const SUPPORTS_MODEL_EXCHANGE: bool = false;

    fn model_variables() -> Vec<ModelVariable> {
        vec![ModelVariable::new("boom", 1, false).causality(Causality::Input)]
    }
}

pub fn instantiate<M: Model>(interface_type: InterfaceType, callbacks: CallbackFunctions) -> ModelInstance<M> {
    ModelInstance::instantiate(
        "inst",
        interface_type,
        M::INSTANTIATION_TOKEN,
        None,
        callbacks,
        false,
        true,
    )
    .unwrap()
}

/// An instance that went through initialization: `StepMode` for Co-Simulation, `EventMode` for
/// Model Exchange.
pub fn initialized<M: Model>(interface_type: InterfaceType) -> ModelInstance<M> {
    let mut inst = instantiate::<M>(interface_type, CallbackFunctions::default());
    inst.setup_experiment(None, 0.0, None).unwrap();
    inst.enter_initialization_mode().unwrap();
    inst.exit_initialization_mode().unwrap();
    inst
}
