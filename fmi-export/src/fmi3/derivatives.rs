//! Directional derivatives `sensitivity = J * seed` of unknowns with respect to knowns.
//!
//! Analytic products come from [`super::UserModel::directional_derivative`]. Without one, the
//! product is approximated with forward differences on copies of the model, so the instance is
//! never modified. Unknown elements are grouped by the known elements they depend on, and every
//! group is evaluated with the seed restricted to its dependencies. Elements without any
//! dependency record are exactly zero.

use std::collections::BTreeMap;

use fmi::fmi3::{Fmi3Error, Fmi3Res, ValueReference};

use crate::store::VariableType;

use super::{instance::Metadata, traits::ModelLoggingCategory, Model, ModelContext};

/// Relative step of the forward difference.
const RELATIVE_STEP: f64 = 1e-7;

/// One element of a (possibly array) variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Element {
    vr: ValueReference,
    /// Zero-based index into the variable.
    index: usize,
}

fn elements(meta: &Metadata, vrs: &[ValueReference]) -> Result<Vec<Element>, String> {
    let mut elements = Vec::new();
    for &vr in vrs {
        let var = meta
            .variables
            .get(&vr)
            .ok_or_else(|| format!("Unknown value reference {vr}"))?;
        if var.variable_type() != VariableType::Float64 {
            return Err(format!(
                "Directional derivatives require Float64 variables, {} is {}",
                var.name(),
                var.variable_type()
            ));
        }
        elements.extend((0..var.len()).map(|index| Element { vr, index }));
    }
    Ok(elements)
}

/// Whether `unknown` structurally depends on `known`. Element index 0 of a record means all
/// elements.
fn depends_on(meta: &Metadata, unknown: Element, known: Element) -> bool {
    if unknown == known {
        return true;
    }
    meta.dependencies.get(&unknown.vr).is_some_and(|records| {
        records.iter().any(|dep| {
            dep.independent == known.vr
                && (dep.dependent_element_index == 0 || dep.dependent_element_index == unknown.index + 1)
                && (dep.independent_element_index == 0 || dep.independent_element_index == known.index + 1)
        })
    })
}

fn read(context: &ModelContext<impl Model>, elements: &[Element]) -> Result<Vec<f64>, Fmi3Error> {
    elements
        .iter()
        .map(|el| Ok(context.slice::<f64>(el.vr)?[el.index]))
        .collect()
}

/// Compute the directional derivative for the instance state given by `model` and `context`.
pub(crate) fn directional_derivative<M: Model>(
    model: &M,
    context: &ModelContext<M>,
    meta: &Metadata,
    unknowns: &[ValueReference],
    knowns: &[ValueReference],
    seed: &[f64],
    sensitivity: &mut [f64],
) -> Result<Fmi3Res, Fmi3Error> {
    let invalid = |message: String| {
        context.log(
            Fmi3Error::Error,
            M::LoggingCategory::error_category(),
            format_args!("{message}"),
        );
        Fmi3Error::Error
    };

    let unknown_elements = elements(meta, unknowns).map_err(invalid)?;
    let known_elements = elements(meta, knowns).map_err(invalid)?;
    if seed.len() != known_elements.len() {
        return Err(invalid(format!(
            "seed has {} values, the knowns have {} elements",
            seed.len(),
            known_elements.len()
        )));
    }
    if sensitivity.len() != unknown_elements.len() {
        return Err(invalid(format!(
            "sensitivity has {} values, the unknowns have {} elements",
            sensitivity.len(),
            unknown_elements.len()
        )));
    }

    let mut scratch_model = model.clone();
    let mut scratch_context = context.clone();
    if let Some(res) =
        scratch_model.directional_derivative(&mut scratch_context, unknowns, knowns, seed, sensitivity)
    {
        return res;
    }

    // group unknown elements by their dependency mask over the known elements
    let mut groups: BTreeMap<Vec<bool>, Vec<usize>> = BTreeMap::new();
    for (i, &unknown) in unknown_elements.iter().enumerate() {
        let mask = known_elements
            .iter()
            .map(|&known| depends_on(meta, unknown, known))
            .collect();
        groups.entry(mask).or_default().push(i);
    }

    let mut base_model = model.clone();
    let mut base_context = context.clone();
    base_model.calculate_values(&mut base_context)?;
    let base_knowns = read(&base_context, &known_elements)?;
    let base_unknowns = read(&base_context, &unknown_elements)?;

    for (mask, rows) in groups {
        let direction: Vec<f64> = seed
            .iter()
            .zip(&mask)
            .map(|(&s, &dependent)| if dependent { s } else { 0.0 })
            .collect();

        if direction.iter().all(|&d| d == 0.0) {
            for row in rows {
                sensitivity[row] = 0.0;
            }
            continue;
        }

        let scale = base_knowns
            .iter()
            .zip(&mask)
            .filter(|(_, &dependent)| dependent)
            .fold(1.0f64, |acc, (x, _)| acc.max(x.abs()));
        let h = RELATIVE_STEP * scale;

        let mut perturbed_model = model.clone();
        let mut perturbed_context = base_context.clone();
        for ((el, x), d) in known_elements.iter().zip(&base_knowns).zip(&direction) {
            perturbed_context.slice_mut::<f64>(el.vr)?[el.index] = x + h * d;
        }
        perturbed_model.calculate_values(&mut perturbed_context)?;
        let perturbed = read(&perturbed_context, &unknown_elements)?;

        for row in rows {
            sensitivity[row] = (perturbed[row] - base_unknowns[row]) / h;
        }
    }

    Ok(Fmi3Res::OK)
}
