//! Composite scoring of selected indicators.
//!
//! A single selected variable is used as-is. Two or more are converted to
//! z-scores, summed per area and the sum re-standardised, so composites built
//! from different numbers of variables share one scale.

use crate::types::AreaRecord;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("no variables selected")]
    EmptySelection,
    #[error("variable '{0}' is not present in the loaded data")]
    UnknownVariable(String),
    #[error("variable '{variable}' has fewer than two observed values")]
    InsufficientData { variable: String },
    #[error("variable '{variable}' has zero standard deviation")]
    ZeroVariance { variable: String },
}

/// Mean of the present values.
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Sample standard deviation (n - 1) of the present values.
pub fn deviation<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    // Welford, as d3.deviation does it
    let mut count = 0usize;
    let mut mean = 0.0;
    let mut sum = 0.0;
    for v in values.into_iter().flatten().filter(|v| v.is_finite()) {
        count += 1;
        let delta = v - mean;
        mean += delta / count as f64;
        sum += delta * (v - mean);
    }
    (count > 1).then(|| (sum / (count - 1) as f64).sqrt())
}

pub fn z_score(value: f64, mean: f64, sd: f64) -> f64 {
    (value - mean) / sd
}

/// Mean and standard deviation of a column, rejecting columns that cannot be standardised.
fn moments(variable: &str, values: &[Option<f64>]) -> Result<(f64, f64), ScoreError> {
    let insufficient = || ScoreError::InsufficientData {
        variable: variable.to_string(),
    };
    let mean = mean(values.iter().copied()).ok_or_else(insufficient)?;
    let sd = deviation(values.iter().copied()).ok_or_else(insufficient)?;
    if sd == 0.0 || !sd.is_finite() {
        return Err(ScoreError::ZeroVariance {
            variable: variable.to_string(),
        });
    }
    Ok((mean, sd))
}

fn column(variable: &str, records: &[AreaRecord]) -> Result<Vec<Option<f64>>, ScoreError> {
    if !records.iter().any(|r| r.values.contains_key(variable)) {
        return Err(ScoreError::UnknownVariable(variable.to_string()));
    }
    Ok(records.iter().map(|r| r.value(variable)).collect())
}

/// Z-scores of `values`, or `None` where the value is missing.
pub fn standardise(variable: &str, values: &[Option<f64>]) -> Result<Vec<Option<f64>>, ScoreError> {
    let (mean, sd) = moments(variable, values)?;
    Ok(values
        .iter()
        .map(|v| v.map(|v| z_score(v, mean, sd)))
        .collect())
}

/// Standardised sum of per-variable z-scores.
///
/// An area missing any input value has no composite.
pub fn sum_of_z(variables: &[String], records: &[AreaRecord]) -> Result<Vec<Option<f64>>, ScoreError> {
    if variables.is_empty() {
        return Err(ScoreError::EmptySelection);
    }
    let mut sums: Vec<Option<f64>> = vec![Some(0.0); records.len()];
    for variable in variables {
        let z = standardise(variable, &column(variable, records)?)?;
        for (sum, z) in sums.iter_mut().zip(z) {
            *sum = match (*sum, z) {
                (Some(acc), Some(z)) => Some(acc + z),
                _ => None,
            };
        }
    }
    standardise("composite", &sums)
}

/// Scores one axis of the plot.
///
/// One variable passes through untouched; several go through [`sum_of_z`].
pub fn composite(variables: &[String], records: &[AreaRecord]) -> Result<Vec<Option<f64>>, ScoreError> {
    match variables {
        [] => Err(ScoreError::EmptySelection),
        [single] => column(single, records),
        _ => sum_of_z(variables, records),
    }
}

/// Z-scores used to pick colours for one plotted axis.
///
/// A constant axis standardises to zero everywhere, leaving the colour scale
/// on its single-colour path.
pub fn standardise_for_colour(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mean = mean(values.iter().copied());
    let sd = deviation(values.iter().copied());
    match (mean, sd) {
        (Some(mean), Some(sd)) if sd > 0.0 && sd.is_finite() => values
            .iter()
            .map(|v| v.map(|v| z_score(v, mean, sd)))
            .collect(),
        _ => values.iter().map(|v| v.map(|_| 0.0)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn record(id: &str, values: &[(&str, Option<f64>)]) -> AreaRecord {
        AreaRecord {
            id: id.to_string(),
            name: format!("Area {}", id),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn records(a: &[f64], b: &[f64]) -> Vec<AreaRecord> {
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(i, (a, b))| record(&format!("W{:08}", i), &[("needA", Some(*a)), ("needB", Some(*b))]))
            .collect()
    }

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn deviation_matches_sample_formula() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].map(Some);
        assert_eq!(mean(values), Some(5.0));
        let sd = deviation(values).unwrap();
        assert!((sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(deviation([Some(1.0)]), None);
        assert_eq!(mean([None, Some(3.0), None]), Some(3.0));
    }

    #[test]
    fn single_variable_passes_through() {
        let data = records(&[3.0, 10.0, -2.5], &[1.0, 2.0, 3.0]);
        let out = composite(&vars(&["needA"]), &data).unwrap();
        assert_eq!(out, vec![Some(3.0), Some(10.0), Some(-2.5)]);
    }

    #[test]
    fn two_needs_are_summed_and_restandardised() {
        let data = records(&[1.0, 2.0, 3.0, 4.0], &[10.0, 30.0, 20.0, 40.0]);
        let out: Vec<f64> = composite(&vars(&["needA", "needB"]), &data)
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();

        let za = standardise("a", &[1.0, 2.0, 3.0, 4.0].map(Some)).unwrap();
        let zb = standardise("b", &[10.0, 30.0, 20.0, 40.0].map(Some)).unwrap();
        let sums: Vec<Option<f64>> = za.iter().zip(&zb).map(|(a, b)| Some(a.unwrap() + b.unwrap())).collect();
        let expected = standardise("sum", &sums).unwrap();
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want.unwrap()).abs() < 1e-12);
        }
        // highest on both inputs ranks highest
        let max = out.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(out[3], max);
    }

    #[test]
    fn constant_variable_is_an_error() {
        let data = records(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]);
        let err = composite(&vars(&["needA", "needB"]), &data).unwrap_err();
        assert_eq!(
            err,
            ScoreError::ZeroVariance {
                variable: "needA".to_string()
            }
        );
    }

    #[test]
    fn empty_and_unknown_selections_are_errors() {
        let data = records(&[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(composite(&[], &data), Err(ScoreError::EmptySelection));
        assert_eq!(
            composite(&vars(&["needA", "nope"]), &data),
            Err(ScoreError::UnknownVariable("nope".to_string()))
        );
    }

    #[test]
    fn missing_value_drops_area_from_composite() {
        let data = vec![
            record("a", &[("x", Some(1.0)), ("y", Some(1.0))]),
            record("b", &[("x", Some(2.0)), ("y", None)]),
            record("c", &[("x", Some(3.0)), ("y", Some(5.0))]),
            record("d", &[("x", Some(4.0)), ("y", Some(2.0))]),
        ];
        let out = composite(&vars(&["x", "y"]), &data).unwrap();
        assert!(out[1].is_none());
        assert_eq!(out.iter().filter(|v| v.is_some()).count(), 3);
    }

    #[test]
    fn colour_standardisation_of_constant_axis_is_zero() {
        let out = standardise_for_colour(&[Some(4.0), None, Some(4.0)]);
        assert_eq!(out, vec![Some(0.0), None, Some(0.0)]);
    }

    proptest! {
        #[test]
        fn composite_has_zero_mean_and_unit_deviation(
            rows in prop::collection::vec((-1.0e3f64..1.0e3, -1.0e3f64..1.0e3, -50.0f64..50.0), 3..60)
        ) {
            let data: Vec<AreaRecord> = rows
                .iter()
                .enumerate()
                .map(|(i, (a, b, c))| record(&i.to_string(), &[("a", Some(*a)), ("b", Some(*b)), ("c", Some(*c))]))
                .collect();
            let variables = vars(&["a", "b", "c"]);
            match composite(&variables, &data) {
                Ok(out) => {
                    let m = mean(out.iter().copied()).unwrap();
                    let sd = deviation(out.iter().copied()).unwrap();
                    prop_assert!(m.abs() < 1e-9);
                    prop_assert!((sd - 1.0).abs() < 1e-9);
                }
                // random columns can collapse to a constant sum
                Err(ScoreError::ZeroVariance { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        #[test]
        fn single_variable_output_equals_input(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..40)) {
            let data: Vec<AreaRecord> = values
                .iter()
                .enumerate()
                .map(|(i, v)| record(&i.to_string(), &[("only", Some(*v))]))
                .collect();
            let out = composite(&vars(&["only"]), &data).unwrap();
            let expected: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
            prop_assert_eq!(out, expected);
        }
    }
}
