use fmi::fmi3::{DependencyKind, Fmi3Error, Fmi3Res, ValueReference, VariableDependency};
use fmi_export::fmi3::{
    Causality, ContinuousState, DefaultExperiment, DefaultLoggingCategory, Initial, Model, ModelContext, ModelVariable,
    UserModel, Variability,
};

/// The Dahlquist test equation `der(x) = -k * x`.
///
/// | VR | name     | causality |
/// |----|----------|-----------|
/// | 1  | `x`      | output    |
/// | 2  | `der(x)` | local     |
/// | 3  | `k`      | parameter |
#[derive(Default, Debug, Clone)]
pub struct Dahlquist;

impl UserModel for Dahlquist {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        let x: f64 = ctx.get(1)?;
        let k: f64 = ctx.get(3)?;
        ctx.set(2, -k * x)?;
        Ok(Fmi3Res::OK)
    }

    fn directional_derivative(
        &mut self,
        ctx: &mut ModelContext<Self>,
        unknowns: &[ValueReference],
        knowns: &[ValueReference],
        seed: &[f64],
        sensitivity: &mut [f64],
    ) -> Option<Result<Fmi3Res, Fmi3Error>> {
        // d der(x) / dx = -k
        if unknowns != [2] || knowns != [1] {
            return None;
        }
        Some(ctx.get::<f64>(3).map(|k| {
            sensitivity[0] = -k * seed[0];
            Fmi3Res::OK
        }))
    }
}

impl Model for Dahlquist {
    const MODEL_NAME: &'static str = "Dahlquist";
    const INSTANTIATION_TOKEN: &'static str = "{221063D2-EF4A-45FE-B954-B5BFEEA9A59B}";
    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 10.0,
        step_size: Some(0.1),
        tolerance: None,
    };

    fn model_variables() -> Vec<ModelVariable> {
        vec![
            ModelVariable::new("x", 1, 1.0)
                .causality(Causality::Output)
                .initial(Initial::Exact)
                .description("the only state"),
            ModelVariable::new("der(x)", 2, 0.0),
            ModelVariable::new("k", 3, 1.0)
                .causality(Causality::Parameter)
                .variability(Variability::Fixed),
        ]
    }

    fn continuous_states() -> Vec<ContinuousState> {
        vec![ContinuousState::new(1, 2)]
    }

    fn dependencies() -> Vec<(ValueReference, VariableDependency)> {
        vec![(2, VariableDependency::on(1, DependencyKind::Dependent))]
    }
}
