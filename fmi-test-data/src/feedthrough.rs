use fmi::fmi3::{DependencyKind, Fmi3Error, Fmi3Res, ValueReference, VariableDependency};
use fmi_export::{
    fmi3::{
        Causality, DefaultExperiment, DefaultLoggingCategory, Model, ModelContext, ModelVariable, StartValues,
        UserModel, Variability,
    },
    store::StoreValue,
};

/// (input, output) value references, every output equals its input.
const PAIRS: [(ValueReference, ValueReference); 15] = [
    (1, 2),
    (3, 4),
    (7, 8),
    (9, 10),
    (11, 12),
    (13, 14),
    (15, 16),
    (17, 18),
    (19, 20),
    (21, 22),
    (23, 24),
    (25, 26),
    (27, 28),
    (30, 31),
    (32, 33),
];

/// Copies every input to the output of the same type, covering all variable kinds.
#[derive(Default, Debug, Clone)]
pub struct Feedthrough;

fn copy<T: StoreValue>(ctx: &mut ModelContext<Feedthrough>, input: ValueReference, output: ValueReference) -> Result<(), Fmi3Error> {
    let values = ctx.slice::<T>(input)?.to_vec();
    ctx.slice_mut::<T>(output)?.clone_from_slice(&values);
    Ok(())
}

impl UserModel for Feedthrough {
    type LoggingCategory = DefaultLoggingCategory;

    fn calculate_values(&mut self, ctx: &mut ModelContext<Self>) -> Result<Fmi3Res, Fmi3Error> {
        copy::<f32>(ctx, 1, 2)?;
        copy::<f32>(ctx, 3, 4)?;
        copy::<f64>(ctx, 7, 8)?;
        copy::<f64>(ctx, 9, 10)?;
        copy::<i8>(ctx, 11, 12)?;
        copy::<u8>(ctx, 13, 14)?;
        copy::<i16>(ctx, 15, 16)?;
        copy::<u16>(ctx, 17, 18)?;
        copy::<i32>(ctx, 19, 20)?;
        copy::<u32>(ctx, 21, 22)?;
        copy::<i64>(ctx, 23, 24)?;
        copy::<u64>(ctx, 25, 26)?;
        copy::<bool>(ctx, 27, 28)?;
        copy::<Vec<u8>>(ctx, 30, 31)?;
        copy::<f64>(ctx, 32, 33)?;
        Ok(Fmi3Res::OK)
    }
}

impl Model for Feedthrough {
    const MODEL_NAME: &'static str = "Feedthrough";
    const INSTANTIATION_TOKEN: &'static str = "{37B954F1-CC86-4D8F-B97F-C7C36F6670D2}";
    const DEFAULT_EXPERIMENT: DefaultExperiment = DefaultExperiment {
        start_time: 0.0,
        stop_time: 2.0,
        step_size: Some(0.1),
        tolerance: None,
    };

    fn model_variables() -> Vec<ModelVariable> {
        let input = |name: &str, vr: ValueReference, start: StartValues| ModelVariable::new(name, vr, start).causality(Causality::Input);
        let output = |name: &str, vr: ValueReference, start: StartValues| ModelVariable::new(name, vr, start).causality(Causality::Output);
        vec![
            input("Float32_continuous_input", 1, 0.0f32.into()),
            output("Float32_continuous_output", 2, 0.0f32.into()),
            input("Float32_discrete_input", 3, 0.0f32.into()).variability(Variability::Discrete),
            output("Float32_discrete_output", 4, 0.0f32.into()).variability(Variability::Discrete),
            ModelVariable::new("Float64_fixed_parameter", 5, 0.0)
                .causality(Causality::Parameter)
                .variability(Variability::Fixed),
            ModelVariable::new("Float64_tunable_parameter", 6, 0.0)
                .causality(Causality::Parameter)
                .variability(Variability::Tunable),
            input("Float64_continuous_input", 7, 0.0f64.into()),
            output("Float64_continuous_output", 8, 0.0f64.into()),
            input("Float64_discrete_input", 9, 0.0f64.into()).variability(Variability::Discrete),
            output("Float64_discrete_output", 10, 0.0f64.into()).variability(Variability::Discrete),
            input("Int8_input", 11, 0i8.into()),
            output("Int8_output", 12, 0i8.into()),
            input("UInt8_input", 13, 0u8.into()),
            output("UInt8_output", 14, 0u8.into()),
            input("Int16_input", 15, 0i16.into()),
            output("Int16_output", 16, 0i16.into()),
            input("UInt16_input", 17, 0u16.into()),
            output("UInt16_output", 18, 0u16.into()),
            input("Int32_input", 19, 0i32.into()),
            output("Int32_output", 20, 0i32.into()),
            input("UInt32_input", 21, 0u32.into()),
            output("UInt32_output", 22, 0u32.into()),
            input("Int64_input", 23, 0i64.into()),
            output("Int64_output", 24, 0i64.into()),
            input("UInt64_input", 25, 0u64.into()),
            output("UInt64_output", 26, 0u64.into()),
            input("Boolean_input", 27, false.into()),
            output("Boolean_output", 28, false.into()),
            ModelVariable::new("String_parameter", 29, "Set me!")
                .causality(Causality::Parameter)
                .variability(Variability::Fixed),
            input("Binary_input", 30, b"foo".into()).max_size(16),
            output("Binary_output", 31, b"foo".into()).max_size(16),
            input("Float64_array_input", 32, [0.0f64; 3].into()),
            output("Float64_array_output", 33, [0.0f64; 3].into()),
        ]
    }

    fn dependencies() -> Vec<(ValueReference, VariableDependency)> {
        PAIRS
            .iter()
            .map(|&(input, output)| (output, VariableDependency::on(input, DependencyKind::Dependent)))
            .collect()
    }
}
