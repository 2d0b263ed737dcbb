//! Runtime description of the variables of a unit.

use fmi::fmi3::ValueReference;

use crate::store::{StoreBuilder, StoreError, VariableType};

use super::ModelState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Causality {
    Parameter,
    CalculatedParameter,
    Input,
    Output,
    Local,
    Independent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variability {
    Constant,
    Fixed,
    Tunable,
    Discrete,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initial {
    Exact,
    Approx,
    Calculated,
}

/// Typed start values of a variable. The number of values is the element count.
#[derive(Debug, Clone, PartialEq)]
pub enum StartValues {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Boolean(Vec<bool>),
    String(Vec<String>),
    Binary(Vec<Vec<u8>>),
}

macro_rules! impl_start_values {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for StartValues {
                fn from(value: $ty) -> Self {
                    Self::$variant(vec![value])
                }
            }
            impl From<Vec<$ty>> for StartValues {
                fn from(value: Vec<$ty>) -> Self {
                    Self::$variant(value)
                }
            }
            impl<const N: usize> From<[$ty; N]> for StartValues {
                fn from(value: [$ty; N]) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_start_values!(
    f32 => Float32,
    f64 => Float64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    bool => Boolean,
    String => String,
);

impl From<&str> for StartValues {
    fn from(value: &str) -> Self {
        Self::String(vec![value.to_owned()])
    }
}

// Byte slices are single Binary values, not UInt8 arrays
impl From<&[u8]> for StartValues {
    fn from(value: &[u8]) -> Self {
        Self::Binary(vec![value.to_vec()])
    }
}

impl<const N: usize> From<&[u8; N]> for StartValues {
    fn from(value: &[u8; N]) -> Self {
        Self::Binary(vec![value.to_vec()])
    }
}

impl StartValues {
    pub fn variable_type(&self) -> VariableType {
        match self {
            Self::Float32(_) => VariableType::Float32,
            Self::Float64(_) => VariableType::Float64,
            Self::Int8(_) => VariableType::Int8,
            Self::Int16(_) => VariableType::Int16,
            Self::Int32(_) => VariableType::Int32,
            Self::Int64(_) => VariableType::Int64,
            Self::UInt8(_) => VariableType::UInt8,
            Self::UInt16(_) => VariableType::UInt16,
            Self::UInt32(_) => VariableType::UInt32,
            Self::UInt64(_) => VariableType::UInt64,
            Self::Boolean(_) => VariableType::Boolean,
            Self::String(_) => VariableType::String,
            Self::Binary(_) => VariableType::Binary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Binary(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_to(&self, vr: ValueReference, builder: &mut StoreBuilder) -> Result<(), StoreError> {
        match self {
            Self::Float32(v) => builder.push(vr, v.clone()),
            Self::Float64(v) => builder.push(vr, v.clone()),
            Self::Int8(v) => builder.push(vr, v.clone()),
            Self::Int16(v) => builder.push(vr, v.clone()),
            Self::Int32(v) => builder.push(vr, v.clone()),
            Self::Int64(v) => builder.push(vr, v.clone()),
            Self::UInt8(v) => builder.push(vr, v.clone()),
            Self::UInt16(v) => builder.push(vr, v.clone()),
            Self::UInt32(v) => builder.push(vr, v.clone()),
            Self::UInt64(v) => builder.push(vr, v.clone()),
            Self::Boolean(v) => builder.push(vr, v.clone()),
            Self::String(v) => builder.push(vr, v.clone()),
            Self::Binary(v) => builder.push(vr, v.clone()),
        }
    }
}

/// A variable of a unit, built with a fluent interface.
///
/// ```rust
/// use fmi_export::fmi3::{Causality, ModelVariable, Variability};
///
/// let k = ModelVariable::new("k", 3, 1.0)
///     .causality(Causality::Parameter)
///     .variability(Variability::Tunable)
///     .description("Gain");
/// assert_eq!(k.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVariable {
    name: String,
    value_reference: ValueReference,
    description: Option<String>,
    causality: Causality,
    variability: Option<Variability>,
    initial: Option<Initial>,
    start: StartValues,
    max_size: Option<usize>,
    nominal: Option<f64>,
}

impl ModelVariable {
    /// Create a new local variable with the given start values; the type and element count
    /// follow from `start`.
    pub fn new(name: impl Into<String>, value_reference: ValueReference, start: impl Into<StartValues>) -> Self {
        Self {
            name: name.into(),
            value_reference,
            description: None,
            causality: Causality::Local,
            variability: None,
            initial: None,
            start: start.into(),
            max_size: None,
            nominal: None,
        }
    }

    /// The independent variable `time`, always at value reference 0.
    pub fn time() -> Self {
        Self::new("time", 0, 0.0f64)
            .causality(Causality::Independent)
            .variability(Variability::Continuous)
            .description("Simulation time")
    }

    pub fn causality(mut self, causality: Causality) -> Self {
        self.causality = causality;
        self
    }

    pub fn variability(mut self, variability: Variability) -> Self {
        self.variability = Some(variability);
        self
    }

    pub fn initial(mut self, initial: Initial) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Maximum size in bytes of a Binary variable.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Nominal value of a continuous state.
    pub fn nominal(mut self, nominal: f64) -> Self {
        self.nominal = Some(nominal);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_reference(&self) -> ValueReference {
        self.value_reference
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn get_causality(&self) -> Causality {
        self.causality
    }

    pub fn variable_type(&self) -> VariableType {
        self.start.variable_type()
    }

    /// Number of elements; 1 for scalars.
    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn start(&self) -> &StartValues {
        &self.start
    }

    pub fn get_max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn get_nominal(&self) -> Option<f64> {
        self.nominal
    }

    /// The variability, defaulting to `Fixed` for parameters, `Continuous` for float types and
    /// `Discrete` otherwise.
    pub fn get_variability(&self) -> Variability {
        self.variability.unwrap_or(match (self.causality, self.variable_type()) {
            (Causality::Parameter | Causality::CalculatedParameter, _) => Variability::Fixed,
            (_, VariableType::Float32 | VariableType::Float64) => Variability::Continuous,
            _ => Variability::Discrete,
        })
    }

    /// The initial attribute, defaulting to `Exact` for parameters, `Calculated` for calculated
    /// parameters, outputs and locals. Inputs and the independent variable have none.
    pub fn get_initial(&self) -> Option<Initial> {
        match self.causality {
            Causality::Input | Causality::Independent => None,
            Causality::Parameter => Some(self.initial.unwrap_or(Initial::Exact)),
            Causality::CalculatedParameter | Causality::Output | Causality::Local => {
                Some(self.initial.unwrap_or(Initial::Calculated))
            }
        }
    }

    pub(crate) fn push_to(&self, builder: &mut StoreBuilder) -> Result<(), StoreError> {
        self.start.push_to(self.value_reference, builder)
    }

    /// Check whether the variable may be written in `state`.
    pub fn check_settable(&self, state: ModelState) -> Result<(), &'static str> {
        if self.causality == Causality::Independent {
            return Err("the independent variable cannot be set");
        }
        let variability = self.get_variability();
        if variability == Variability::Constant {
            return Err("constant variables cannot be set");
        }
        match state {
            ModelState::Instantiated | ModelState::InitializationMode => match self.causality {
                Causality::Parameter | Causality::Input => Ok(()),
                Causality::CalculatedParameter => Err("calculated parameters cannot be set"),
                _ => match self.get_initial() {
                    Some(Initial::Exact | Initial::Approx) => Ok(()),
                    _ => Err("calculated variables cannot be set"),
                },
            },
            ModelState::EventMode | ModelState::StepMode => match (self.causality, variability) {
                (Causality::Input, _) | (Causality::Parameter, Variability::Tunable) => Ok(()),
                _ => Err("only inputs and tunable parameters can be set after initialization"),
            },
            ModelState::ContinuousTimeMode => match (self.causality, variability) {
                (Causality::Input, Variability::Continuous) => Ok(()),
                _ => Err("only continuous inputs can be set in continuous-time mode"),
            },
            _ => Err("variables cannot be set in this state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn start_values_define_type_and_len() {
        let v = ModelVariable::new("v", 1, [1.0, 2.0, 3.0]);
        assert_eq!(v.variable_type(), VariableType::Float64);
        assert_eq!(v.len(), 3);
        assert_eq!(v.get_variability(), Variability::Continuous);

        let b = ModelVariable::new("b", 2, b"\x01\x02").max_size(4);
        assert_eq!(b.variable_type(), VariableType::Binary);
        assert_eq!(b.len(), 1);
        assert_eq!(b.get_max_size(), Some(4));

        let s = ModelVariable::new("s", 3, "text").causality(Causality::Parameter);
        assert_eq!(s.variable_type(), VariableType::String);
        assert_eq!(s.get_variability(), Variability::Fixed);
        assert_eq!(s.get_initial(), Some(Initial::Exact));
    }

    #[rstest]
    #[case(ModelState::Instantiated, Causality::Parameter, Variability::Fixed, None, true)]
    #[case(ModelState::InitializationMode, Causality::Input, Variability::Continuous, None, true)]
    #[case(ModelState::InitializationMode, Causality::Output, Variability::Continuous, None, false)]
    #[case(ModelState::InitializationMode, Causality::Output, Variability::Continuous, Some(Initial::Exact), true)]
    #[case(ModelState::InitializationMode, Causality::CalculatedParameter, Variability::Fixed, None, false)]
    #[case(ModelState::InitializationMode, Causality::Parameter, Variability::Constant, None, false)]
    #[case(ModelState::EventMode, Causality::Parameter, Variability::Fixed, None, false)]
    #[case(ModelState::EventMode, Causality::Parameter, Variability::Tunable, None, true)]
    #[case(ModelState::StepMode, Causality::Input, Variability::Discrete, None, true)]
    #[case(ModelState::StepMode, Causality::Output, Variability::Continuous, Some(Initial::Exact), false)]
    #[case(ModelState::ContinuousTimeMode, Causality::Input, Variability::Discrete, None, false)]
    #[case(ModelState::ContinuousTimeMode, Causality::Input, Variability::Continuous, None, true)]
    #[case(ModelState::Terminated, Causality::Input, Variability::Continuous, None, false)]
    fn settable_matrix(
        #[case] state: ModelState,
        #[case] causality: Causality,
        #[case] variability: Variability,
        #[case] initial: Option<Initial>,
        #[case] settable: bool,
    ) {
        let mut var = ModelVariable::new("x", 1, 0.0)
            .causality(causality)
            .variability(variability);
        if let Some(initial) = initial {
            var = var.initial(initial);
        }
        assert_eq!(var.check_settable(state).is_ok(), settable);
    }

    #[test]
    fn time_is_never_settable() {
        let time = ModelVariable::time();
        assert_eq!(time.value_reference(), 0);
        assert!(time.check_settable(ModelState::Instantiated).is_err());
    }
}
