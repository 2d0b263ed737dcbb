use bytes::{Buf, BufMut, BytesMut};
use fmi::{
    fmi3::{Fmi3Error, Fmi3Res},
    EventFlags,
};
use fmi_export::{
    fmi3::{
        Causality, ContinuousState, DefaultExperiment, DefaultLoggingCategory, Initial, Model, ModelContext,
        ModelLoggingCategory, ModelVariable, UserModel, Variability,
    },
    store::StoreError,
};

const H: u32 = 1;
const DER_H: u32 = 2;
const V: u32 = 3;
const DER_V: u32 = 4;
const G: u32 = 5;
const E: u32 = 6;
const V_MIN: u32 = 7;

/// A ball bouncing on the ground, losing energy on every impact.
///
/// The event indicator is the height `h`. At impact the velocity is reversed and scaled by the
/// coefficient of restitution `e`; once it drops below `v_min` the ball rests on the ground.
#[derive(Default, Debug, Clone)]
pub struct BouncingBall {
    resting: bool,
}

impl BouncingBall {
    /// The ball stopped bouncing and lies on the ground.
    pub fn is_resting(&self) -> bool {
        self.resting
    }
}

impl UserModel for BouncingBall {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        let v: f64 = ctx.get(V)?;
        let g: f64 = ctx.get(G)?;
        ctx.set(DER_H, v)?;
        ctx.set(DER_V, if self.resting { 0.0 } else { g })?;
        Ok(Fmi3Res::OK)
    }

    fn event_update(&mut self, ctx: &mut ModelContext<Self>, flags: &mut EventFlags) -> Result<Fmi3Res, Fmi3Error> {
        flags.reset();
        let h: f64 = ctx.get(H)?;
        let v: f64 = ctx.get(V)?;
        if self.resting || h > 0.0 || v >= 0.0 {
            return Ok(Fmi3Res::OK);
        }

        let bounce = -v * ctx.get::<f64>(E)?;
        // slightly above the ground, so the indicator does not fire again
        ctx.set(H, f64::MIN_POSITIVE)?;
        if bounce < ctx.get::<f64>(V_MIN)? {
            self.resting = true;
            ctx.set(V, 0.0)?;
            ctx.log(
                Fmi3Res::OK,
                DefaultLoggingCategory::event_category(),
                format_args!("Ball came to rest at t = {}", ctx.time()),
            );
        } else {
            ctx.set(V, bounce)?;
        }
        flags.values_of_continuous_states_changed = true;
        Ok(Fmi3Res::OK)
    }

    fn get_event_indicators(&mut self, ctx: &ModelContext<Self>, indicators: &mut [f64]) -> Result<Fmi3Res, Fmi3Error> {
        indicators[0] = if self.resting { 1.0 } else { ctx.get(H)? };
        Ok(Fmi3Res::OK)
    }

    fn serialize_state(&self, buf: &mut BytesMut) {
        buf.put_u8(self.resting.into());
    }

    fn deserialize_state(&mut self, buf: &mut &[u8]) -> Result<(), StoreError> {
        if !buf.has_remaining() {
            return Err(StoreError::BadSerialization("bouncing ball state"));
        }
        self.resting = buf.get_u8() != 0;
        Ok(())
    }
}

impl Model for BouncingBall {
    const MODEL_NAME: &'static str = "BouncingBall";
    const INSTANTIATION_TOKEN: &'static str = "{1AE5E10D-9521-4DE3-80B9-D0EAAA7D5AF1}";
    const NUM_EVENT_INDICATORS: usize = 1;
    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 3.0,
        step_size: Some(0.01),
        tolerance: None,
    };

    fn model_variables() -> Vec<ModelVariable> {
        vec![
            ModelVariable::new("h", H, 1.0)
                .causality(Causality::Output)
                .initial(Initial::Exact)
                .description("Position of the ball"),
            ModelVariable::new("der(h)", DER_H, 0.0).description("Derivative of h"),
            ModelVariable::new("v", V, 0.0)
                .causality(Causality::Output)
                .initial(Initial::Exact)
                .description("Velocity of the ball"),
            ModelVariable::new("der(v)", DER_V, 0.0).description("Derivative of v"),
            ModelVariable::new("g", G, -9.81)
                .causality(Causality::Parameter)
                .variability(Variability::Fixed)
                .description("Gravity acting on the ball"),
            ModelVariable::new("e", E, 0.7)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable)
                .description("Coefficient of restitution"),
            ModelVariable::new("v_min", V_MIN, 0.1)
                .variability(Variability::Constant)
                .description("Velocity below which the ball stops bouncing"),
        ]
    }

    fn continuous_states() -> Vec<ContinuousState> {
        vec![ContinuousState::new(H, DER_H), ContinuousState::new(V, DER_V)]
    }
}
