use fmi::fmi3::{DependencyKind, Fmi3Error, Fmi3Res, ValueReference, VariableDependency};
use fmi_export::fmi3::{
    Causality, ContinuousState, DefaultExperiment, DefaultLoggingCategory, Initial, Model, ModelContext,
    ModelLoggingCategory, ModelVariable, UserModel, Variability,
};

/// `der(x) = k * u`, a unit without direct feedthrough.
///
/// | VR | name            | causality             |
/// |----|-----------------|-----------------------|
/// | 1  | `u`             | input                 |
/// | 2  | `x`             | output                |
/// | 3  | `der(x)`        | local                 |
/// | 4  | `k`             | tunable parameter     |
/// | 5  | `max_step_size` | tunable parameter     |
///
/// Communication steps larger than `max_step_size` are discarded. Input and output derivatives
/// of first order are supported, and steps run asynchronously when the importer asks for it.
#[derive(Default, Debug, Clone)]
pub struct Integrator;

impl UserModel for Integrator {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        let u: f64 = ctx.get(1)?;
        let k: f64 = ctx.get(4)?;
        ctx.set(3, k * u)?;
        Ok(Fmi3Res::OK)
    }

    fn check_step(&mut self, ctx: &ModelContext<Self>, t: f64, h: f64) -> Result<Fmi3Res, Fmi3Error> {
        let max_step_size: f64 = ctx.get(5)?;
        if h > max_step_size {
            ctx.log(
                Fmi3Error::Discard,
                DefaultLoggingCategory::error_category(),
                format_args!("Step of {h} at t = {t} exceeds max_step_size {max_step_size}"),
            );
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
        if (vr, order) != (2, 1) {
            return Err(Fmi3Error::Error);
        }
        values[0] = ctx.get::<f64>(4)? * ctx.get::<f64>(1)?;
        Ok(Fmi3Res::OK)
    }
}

impl Model for Integrator {
    const MODEL_NAME: &'static str = "Integrator";
    const INSTANTIATION_TOKEN: &'static str = "{5E6A2B3C-7D0B-4C74-9B1E-4F6D8A2C1E93}";
    const MAX_INPUT_DERIVATIVE_ORDER: i32 = 1;
    const MAX_OUTPUT_DERIVATIVE_ORDER: i32 = 1;
    const CAN_RUN_ASYNCHRONOUSLY: bool = true;
    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 1.0,
        step_size: Some(0.1),
        tolerance: None,
    };

    fn model_variables() -> Vec<ModelVariable> {
        vec![
            ModelVariable::new("u", 1, 0.0).causality(Causality::Input),
            ModelVariable::new("x", 2, 0.0)
                .causality(Causality::Output)
                .initial(Initial::Exact),
            ModelVariable::new("der(x)", 3, 0.0),
            ModelVariable::new("k", 4, 1.0)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
            ModelVariable::new("max_step_size", 5, f64::INFINITY)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
        ]
    }

    fn continuous_states() -> Vec<ContinuousState> {
        vec![ContinuousState::new(2, 3)]
    }

    fn dependencies() -> Vec<(ValueReference, VariableDependency)> {
        vec![
            (3, VariableDependency::on(1, DependencyKind::Dependent)),
            (3, VariableDependency::on(4, DependencyKind::Dependent)),
        ]
    }
}

/// `y = k * u + offset`, a unit with direct feedthrough from `u` to `y`.
///
/// | VR | name     | causality         |
/// |----|----------|-------------------|
/// | 1  | `u`      | input             |
/// | 2  | `y`      | output            |
/// | 3  | `k`      | tunable parameter |
/// | 4  | `offset` | tunable parameter |
#[derive(Default, Debug, Clone)]
pub struct Gain;

impl UserModel for Gain {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        let u: f64 = ctx.get(1)?;
        let k: f64 = ctx.get(3)?;
        let offset: f64 = ctx.get(4)?;
        ctx.set(2, k * u + offset)?;
        Ok(Fmi3Res::OK)
    }
}

impl Model for Gain {
    const MODEL_NAME: &'static str = "Gain";
    const INSTANTIATION_TOKEN: &'static str = "{0C3F6F2E-95B8-4E1F-A0D4-2B7C9E5A6D10}";
    const SUPPORTS_MODEL_EXCHANGE: bool = false;
    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 1.0,
        step_size: Some(0.1),
        tolerance: None,
    };

    fn model_variables() -> Vec<ModelVariable> {
        vec![
            ModelVariable::new("u", 1, 0.0).causality(Causality::Input),
            ModelVariable::new("y", 2, 0.0).causality(Causality::Output),
            ModelVariable::new("k", 3, 1.0)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
            ModelVariable::new("offset", 4, 0.0)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
        ]
    }

    fn dependencies() -> Vec<(ValueReference, VariableDependency)> {
        vec![(2, VariableDependency::on(1, DependencyKind::Dependent))]
    }
}
