//! Test data generators for creating synthetic forecast data.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

use std::collections::BTreeMap;

use nwp_common::{
    CanonicalDataset, DataVariable, GridCoordinate, InitTime, RawRecord, StepOffset, VariableKey,
};

/// Step axis from whole hours.
///
/// ```
/// use test_utils::hours;
///
/// let steps = hours(&[0, 3]);
/// assert_eq!(steps[1].minutes(), 180);
/// ```
pub fn hours(values: &[u32]) -> Vec<StepOffset> {
    values.iter().map(|h| StepOffset::from_hours(*h)).collect()
}

/// Values of one variable over `steps`, step-major.
///
/// Each point holds `base + step_hours * 100 + point_index`, so any value
/// identifies its step and position.
pub fn step_values(steps: &[StepOffset], points: usize, base: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(steps.len() * points);
    for step in steps {
        let offset = step.minutes() as f32 / 60.0 * 100.0;
        for i in 0..points {
            data.push(base + offset + i as f32);
        }
    }
    data
}

/// A raw record with [`step_values`] data.
pub fn make_record(
    init_time: InitTime,
    variable: &str,
    step_hours: &[u32],
    grid: &GridCoordinate,
    base: f32,
) -> RawRecord {
    let steps = hours(step_hours);
    let values = step_values(&steps, grid.points(), base);
    RawRecord {
        init_time,
        steps,
        grid: grid.clone(),
        variable: VariableKey::new(variable).expect("valid variable name"),
        units: "1".to_string(),
        values,
    }
}

/// A dataset where every variable covers every step.
///
/// Variables get bases 0, 10_000, 20_000... in the order given.
pub fn make_dataset(
    init_time: InitTime,
    step_hours: &[u32],
    variables: &[&str],
    grid: &GridCoordinate,
) -> CanonicalDataset {
    let steps = hours(step_hours);
    let variables: BTreeMap<VariableKey, DataVariable> = variables
        .iter()
        .enumerate()
        .map(|(i, name)| {
            (
                VariableKey::new(*name).expect("valid variable name"),
                DataVariable::new("1", step_values(&steps, grid.points(), i as f32 * 10_000.0)),
            )
        })
        .collect();
    CanonicalDataset::try_new(init_time, steps, grid.clone(), variables)
        .expect("generated dataset is consistent")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{grids, init_times};

    #[test]
    fn test_step_values_identify_step_and_point() {
        let values = step_values(&hours(&[0, 2]), 3, 5.0);
        assert_eq!(values, vec![5.0, 6.0, 7.0, 205.0, 206.0, 207.0]);
    }

    #[test]
    fn test_make_dataset() {
        let ds = make_dataset(
            init_times::t0(),
            &[0, 1],
            &["temperature_sl", "relative_humidity_sl"],
            &grids::small_latlon(),
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.steps().len(), 2);
        let t = ds.values_at("temperature_sl", StepOffset::ZERO).unwrap();
        assert_eq!(t[0], 0.0);
        let rh = ds
            .values_at("relative_humidity_sl", StepOffset::from_hours(1))
            .unwrap();
        assert_eq!(rh[0], 10_100.0);
    }

    #[test]
    fn test_make_record_is_well_formed() {
        let r = make_record(
            init_times::t1(),
            "temperature_sl",
            &[0, 3, 6],
            &grids::small_projected(),
            280.0,
        );
        assert_eq!(r.values.len(), r.expected_len());
    }
}
