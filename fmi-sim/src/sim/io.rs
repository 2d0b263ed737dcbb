//! Recording of unit outputs into Arrow record batches.

use std::{path::Path, sync::Arc};

use arrow::{
    array::{
        make_builder, ArrayBuilder, BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder,
        Int32Builder, Int64Builder, Int8Builder, StringBuilder, UInt16Builder, UInt32Builder, UInt64Builder,
        UInt8Builder,
    },
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use fmi::fmi3::{Fmi3Res, ValueReference};
use fmi_export::{
    fmi3::{Causality, ModelVariable},
    store::VariableType,
};

use super::unit::{SimUnit, UnitResult};
use crate::Error;

fn data_type(ty: VariableType) -> DataType {
    match ty {
        VariableType::Float32 => DataType::Float32,
        VariableType::Float64 => DataType::Float64,
        VariableType::Int8 => DataType::Int8,
        VariableType::Int16 => DataType::Int16,
        VariableType::Int32 => DataType::Int32,
        VariableType::Int64 => DataType::Int64,
        VariableType::UInt8 => DataType::UInt8,
        VariableType::UInt16 => DataType::UInt16,
        VariableType::UInt32 => DataType::UInt32,
        VariableType::UInt64 => DataType::UInt64,
        VariableType::Boolean => DataType::Boolean,
        VariableType::String => DataType::Utf8,
        VariableType::Binary => DataType::Binary,
    }
}

/// One output column: a scalar variable, or one element of an array variable.
struct Recorder {
    field: Field,
    unit: usize,
    value_reference: ValueReference,
    ty: VariableType,
    len: usize,
    element: usize,
    builder: Box<dyn ArrayBuilder>,
}

impl Recorder {
    fn builder<B: ArrayBuilder>(&mut self) -> Result<&mut B, Error> {
        let name = self.field.name().clone();
        self.builder
            .as_any_mut()
            .downcast_mut::<B>()
            .ok_or(Error::Output(name))
    }
}

macro_rules! impl_recorder {
    ($recorder:ident, $unit:ident, $getter:ident, $builder_type:ident) => {{
        let mut values = vec![Default::default(); $recorder.len];
        $unit
            .$getter(&[$recorder.value_reference], values.as_mut_slice())
            .or_failed($unit.instance_name())?;
        let value = values[$recorder.element];
        $recorder.builder::<$builder_type>()?.append_value(value);
    }};
}

/// Collects the outputs of one or more units at every communication point.
pub struct OutputState {
    time: Float64Builder,
    recorders: Vec<Recorder>,
}

impl OutputState {
    /// Record every output of `units`. With `qualified` names, columns are called
    /// `instance.variable`, otherwise just `variable`.
    pub fn new(units: &[Box<dyn SimUnit>], qualified: bool, num_points: usize) -> Self {
        let mut recorders = Vec::new();
        for (unit_index, unit) in units.iter().enumerate() {
            let outputs = unit
                .variables()
                .into_iter()
                .filter(|var| var.get_causality() == Causality::Output);
            for var in outputs {
                recorders.extend(Self::columns(unit.instance_name(), unit_index, &var, qualified, num_points));
            }
        }
        Self {
            time: Float64Builder::with_capacity(num_points),
            recorders,
        }
    }

    fn columns<'a>(
        instance_name: &'a str,
        unit: usize,
        var: &'a ModelVariable,
        qualified: bool,
        num_points: usize,
    ) -> impl Iterator<Item = Recorder> + 'a {
        let data_type = data_type(var.variable_type());
        (0..var.len()).map(move |element| {
            let mut name = if qualified {
                format!("{instance_name}.{}", var.name())
            } else {
                var.name().to_owned()
            };
            if var.len() > 1 {
                name.push_str(&format!("[{}]", element + 1));
            }
            Recorder {
                field: Field::new(name, data_type.clone(), false),
                unit,
                value_reference: var.value_reference(),
                ty: var.variable_type(),
                len: var.len(),
                element,
                builder: make_builder(&data_type, num_points),
            }
        })
    }

    pub fn record_outputs(&mut self, time: f64, units: &mut [Box<dyn SimUnit>]) -> Result<(), Error> {
        log::trace!("Recording outputs at t = {time}");
        self.time.append_value(time);

        for recorder in &mut self.recorders {
            let unit = units
                .get_mut(recorder.unit)
                .ok_or_else(|| Error::Output(recorder.field.name().clone()))?;
            match recorder.ty {
                VariableType::Float32 => impl_recorder!(recorder, unit, get_float32, Float32Builder),
                VariableType::Float64 => impl_recorder!(recorder, unit, get_float64, Float64Builder),
                VariableType::Int8 => impl_recorder!(recorder, unit, get_int8, Int8Builder),
                VariableType::Int16 => impl_recorder!(recorder, unit, get_int16, Int16Builder),
                VariableType::Int32 => impl_recorder!(recorder, unit, get_int32, Int32Builder),
                VariableType::Int64 => impl_recorder!(recorder, unit, get_int64, Int64Builder),
                VariableType::UInt8 => impl_recorder!(recorder, unit, get_uint8, UInt8Builder),
                VariableType::UInt16 => impl_recorder!(recorder, unit, get_uint16, UInt16Builder),
                VariableType::UInt32 => impl_recorder!(recorder, unit, get_uint32, UInt32Builder),
                VariableType::UInt64 => impl_recorder!(recorder, unit, get_uint64, UInt64Builder),
                VariableType::Boolean => impl_recorder!(recorder, unit, get_boolean, BooleanBuilder),
                VariableType::String => {
                    let mut values = vec![String::new(); recorder.len];
                    unit.get_string(&[recorder.value_reference], &mut values)
                        .or_failed(unit.instance_name())?;
                    let value = std::mem::take(&mut values[recorder.element]);
                    recorder.builder::<StringBuilder>()?.append_value(value);
                }
                VariableType::Binary => {
                    let value = read_binary(&mut **unit, recorder.value_reference, recorder.len, recorder.element)?;
                    recorder.builder::<BinaryBuilder>()?.append_value(value);
                }
            }
        }

        Ok(())
    }

    /// Finish the output state and return the RecordBatch.
    pub fn finish(self) -> Result<RecordBatch, Error> {
        let Self { mut time, recorders } = self;

        let recorders = recorders
            .into_iter()
            .map(|Recorder { field, mut builder, .. }| (field, builder.finish()));

        let time = std::iter::once((
            Field::new("time", DataType::Float64, false),
            Arc::new(time.finish()) as _,
        ));

        let (fields, columns): (Vec<_>, Vec<_>) = time.chain(recorders).unzip();
        let schema = Arc::new(Schema::new(fields));
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Read one element of a binary variable, growing the buffers when the unit reports larger sizes.
fn read_binary(unit: &mut dyn SimUnit, vr: ValueReference, len: usize, element: usize) -> Result<Vec<u8>, Error> {
    let mut sizes = vec![0; len];
    let mut buffers: Vec<Vec<u8>> = vec![Vec::new(); len];
    loop {
        let mut slices: Vec<&mut [u8]> = buffers.iter_mut().map(Vec::as_mut_slice).collect();
        let res = unit
            .get_binary(&[vr], &mut sizes, &mut slices)
            .or_failed(unit.instance_name())?;
        if res != Fmi3Res::Warning || buffers.iter().zip(&sizes).all(|(buf, &size)| buf.len() >= size) {
            break;
        }
        for (buf, &size) in buffers.iter_mut().zip(&sizes) {
            buf.resize(size, 0);
        }
    }
    let mut value = std::mem::take(&mut buffers[element]);
    value.truncate(sizes[element]);
    Ok(value)
}

/// Write the output as CSV, with a header row.
pub fn write_csv(path: &Path, batch: &RecordBatch) -> Result<(), Error> {
    let file = std::fs::File::create(path)?;
    let mut writer = arrow::csv::WriterBuilder::new().with_header(true).build(file);
    writer.write(batch)?;
    log::info!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use arrow::{array::AsArray, datatypes::Float64Type};
    use fmi::{fmi3::CallbackFunctions, InterfaceType};

    use super::*;
    use crate::sim::unit;

    #[test_log::test]
    fn records_every_output() {
        let mut units = vec![unit::instantiate(
            "Feedthrough",
            "ft",
            InterfaceType::CoSimulation,
            CallbackFunctions::default(),
        )
        .unwrap()];
        units[0].setup_experiment(None, 0.0, None).unwrap();
        units[0].enter_initialization_mode().unwrap();
        units[0].set_float64(&[7, 32], &[0.5, 1.0, 2.0, 3.0]).unwrap();
        units[0].set_binary(&[30], &[&b"bar\0baz"[..]]).unwrap();

        let mut output = OutputState::new(&units, true, 1);
        output.record_outputs(0.0, &mut units).unwrap();
        let batch = output.finish().unwrap();

        assert_eq!(batch.num_rows(), 1);
        let column = |name: &str| batch.column_by_name(name).unwrap().clone();
        assert_eq!(
            column("ft.Float64_continuous_output").as_primitive::<Float64Type>().value(0),
            0.5
        );
        assert_eq!(
            column("ft.Float64_array_output[3]").as_primitive::<Float64Type>().value(0),
            3.0
        );
        assert_eq!(column("ft.Binary_output").as_binary::<i32>().value(0), b"bar\0baz");
        assert!(batch.column_by_name("ft.Float64_continuous_input").is_none());
    }

    #[test]
    fn csv_output() {
        let mut time = Float64Builder::new();
        time.append_slice(&[0.0, 0.5]);
        let schema = Arc::new(Schema::new(vec![Field::new("time", DataType::Float64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(time.finish())]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &batch).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "time\n0.0\n0.5\n");
    }
}
