//! The canonical per-init-time dataset.

use std::collections::BTreeMap;

use crate::error::{NwpError, NwpResult};
use crate::grid::GridCoordinate;
use crate::time::{InitTime, StepOffset};
use crate::variable::VariableKey;

/// Sentinel stored wherever a variable has no data.
pub const MISSING_VALUE: f32 = f32::NAN;

/// Name of the leading (length-1) time dimension.
pub const TIME_DIMENSION: &str = "init_time";

/// Name of the lead-time dimension.
pub const STEP_DIMENSION: &str = "step";

/// Whether a value is the missing-value sentinel.
#[inline]
pub fn is_missing(value: f32) -> bool {
    value.is_nan()
}

/// Move step-major `values` from the `from` step axis onto the `to` axis.
///
/// Positions of `to` without a counterpart in `from` are filled with
/// [`MISSING_VALUE`]. Every step of `from` must appear in `to`.
pub fn reindex_steps(
    values: &[f32],
    from: &[StepOffset],
    to: &[StepOffset],
    points: usize,
) -> NwpResult<Vec<f32>> {
    if values.len() != from.len() * points {
        return Err(NwpError::invalid_dataset(format!(
            "expected {} values for {} steps, found {}",
            from.len() * points,
            from.len(),
            values.len()
        )));
    }

    let mut out = vec![MISSING_VALUE; to.len() * points];
    for (src_index, step) in from.iter().enumerate() {
        let dst_index = to.binary_search(step).map_err(|_| {
            NwpError::invalid_dataset(format!("step {} is not on the target axis", step))
        })?;
        out[dst_index * points..(dst_index + 1) * points]
            .copy_from_slice(&values[src_index * points..(src_index + 1) * points]);
    }
    Ok(out)
}

/// A dense variable buffer indexed `[step, spatial...]`.
#[derive(Debug, Clone)]
pub struct DataVariable {
    pub units: String,
    pub values: Vec<f32>,
}

impl DataVariable {
    pub fn new(units: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            units: units.into(),
            values,
        }
    }

    /// Count of missing-value positions.
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| is_missing(**v)).count()
    }
}

/// All variables of one init time on a shared step axis and grid.
///
/// Dimension order is always `(init_time, step, <grid dimensions>)` with a
/// single init time.
#[derive(Debug, Clone)]
pub struct CanonicalDataset {
    init_time: InitTime,
    steps: Vec<StepOffset>,
    grid: GridCoordinate,
    variables: BTreeMap<VariableKey, DataVariable>,
}

impl CanonicalDataset {
    /// Assemble a dataset, checking the shared-axis invariants.
    pub fn try_new(
        init_time: InitTime,
        steps: Vec<StepOffset>,
        grid: GridCoordinate,
        variables: BTreeMap<VariableKey, DataVariable>,
    ) -> NwpResult<Self> {
        if steps.is_empty() {
            return Err(NwpError::invalid_dataset("step axis is empty"));
        }
        if steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(NwpError::invalid_dataset(
                "step axis must be strictly increasing",
            ));
        }
        grid.validate()?;
        if variables.is_empty() {
            return Err(NwpError::invalid_dataset("dataset has no variables"));
        }

        let expected = steps.len() * grid.points();
        for (key, variable) in &variables {
            if variable.values.len() != expected {
                return Err(NwpError::invalid_dataset(format!(
                    "variable {} has {} values, expected {}",
                    key,
                    variable.values.len(),
                    expected
                )));
            }
        }

        Ok(Self {
            init_time,
            steps,
            grid,
            variables,
        })
    }

    pub fn init_time(&self) -> InitTime {
        self.init_time
    }

    pub fn steps(&self) -> &[StepOffset] {
        &self.steps
    }

    pub fn grid(&self) -> &GridCoordinate {
        &self.grid
    }

    pub fn variables(&self) -> impl Iterator<Item = (&VariableKey, &DataVariable)> {
        self.variables.iter()
    }

    pub fn variable_keys(&self) -> impl Iterator<Item = &VariableKey> {
        self.variables.keys()
    }

    pub fn variable(&self, key: &str) -> Option<&DataVariable> {
        self.variables.get(key)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Dimension names in storage order.
    pub fn dimension_names(&self) -> Vec<&'static str> {
        let mut dims = vec![TIME_DIMENSION, STEP_DIMENSION];
        dims.extend_from_slice(self.grid.dimension_names());
        dims
    }

    /// Full array shape in storage order.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![1, self.steps.len()];
        shape.extend(self.grid.shape());
        shape
    }

    pub fn step_index(&self, step: StepOffset) -> Option<usize> {
        self.steps.binary_search(&step).ok()
    }

    /// Values of one variable at one step.
    pub fn values_at(&self, key: &str, step: StepOffset) -> Option<&[f32]> {
        let index = self.step_index(step)?;
        let points = self.grid.points();
        self.variables
            .get(key)
            .map(|v| &v.values[index * points..(index + 1) * points])
    }

    /// Reindex every variable onto a wider step axis.
    pub fn reindexed(&self, steps: &[StepOffset]) -> NwpResult<Self> {
        let points = self.grid.points();
        let variables = self
            .variables
            .iter()
            .map(|(key, var)| {
                reindex_steps(&var.values, &self.steps, steps, points)
                    .map(|values| (key.clone(), DataVariable::new(var.units.clone(), values)))
            })
            .collect::<NwpResult<BTreeMap<_, _>>>()?;
        Self::try_new(self.init_time, steps.to_vec(), self.grid.clone(), variables)
    }

    /// Deterministic digest of the dataset content.
    ///
    /// Covers init time, steps, grid, units and values. All NaN payloads
    /// hash identically.
    pub fn content_digest(&self) -> String {
        let mut ctx = md5::Context::new();
        ctx.consume(self.init_time.key().as_bytes());
        for step in &self.steps {
            ctx.consume(step.minutes().to_le_bytes());
        }
        ctx.consume(self.grid.to_string().as_bytes());
        for (key, var) in &self.variables {
            ctx.consume(key.as_str().as_bytes());
            ctx.consume([0u8]);
            ctx.consume(var.units.as_bytes());
            ctx.consume([0u8]);
            for value in &var.values {
                let bits = if is_missing(*value) {
                    MISSING_VALUE.to_bits()
                } else {
                    value.to_bits()
                };
                ctx.consume(bits.to_le_bytes());
            }
        }
        format!("{:x}", ctx.compute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Axis;

    fn grid_2x2() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(10.0, -1.0, 2), Axis::new(0.0, 1.0, 2))
    }

    fn hours(h: &[u32]) -> Vec<StepOffset> {
        h.iter().map(|h| StepOffset::from_hours(*h)).collect()
    }

    fn dataset(values: Vec<f32>) -> CanonicalDataset {
        let mut vars = BTreeMap::new();
        vars.insert(
            VariableKey::new("temperature_sl").unwrap(),
            DataVariable::new("K", values),
        );
        CanonicalDataset::try_new(
            InitTime::from_ymd_h(2024, 1, 1, 0).unwrap(),
            hours(&[0, 1]),
            grid_2x2(),
            vars,
        )
        .unwrap()
    }

    #[test]
    fn test_reindex_inserts_missing() {
        let out = reindex_steps(&[1.0, 2.0, 3.0, 4.0], &hours(&[0, 2]), &hours(&[0, 1, 2]), 2)
            .unwrap();
        assert_eq!(&out[0..2], &[1.0, 2.0]);
        assert!(out[2..4].iter().all(|v| is_missing(*v)));
        assert_eq!(&out[4..6], &[3.0, 4.0]);
    }

    #[test]
    fn test_reindex_rejects_steps_off_axis() {
        let result = reindex_steps(&[1.0, 2.0], &hours(&[5]), &hours(&[0, 1]), 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_try_new_checks_lengths_and_order() {
        let mut vars = BTreeMap::new();
        vars.insert(
            VariableKey::new("temperature_sl").unwrap(),
            DataVariable::new("K", vec![0.0; 3]),
        );
        let t = InitTime::from_ymd_h(2024, 1, 1, 0).unwrap();
        assert!(CanonicalDataset::try_new(t, hours(&[0]), grid_2x2(), vars.clone()).is_err());
        assert!(CanonicalDataset::try_new(t, hours(&[1, 0]), grid_2x2(), vars).is_err());
    }

    #[test]
    fn test_shape_and_dimensions() {
        let ds = dataset(vec![0.0; 8]);
        assert_eq!(ds.shape(), vec![1, 2, 2, 2]);
        assert_eq!(
            ds.dimension_names(),
            vec!["init_time", "step", "latitude", "longitude"]
        );
    }

    #[test]
    fn test_values_at() {
        let ds = dataset((0..8).map(|v| v as f32).collect());
        assert_eq!(
            ds.values_at("temperature_sl", StepOffset::from_hours(1)),
            Some(&[4.0, 5.0, 6.0, 7.0][..])
        );
        assert_eq!(ds.values_at("temperature_sl", StepOffset::from_hours(3)), None);
        assert_eq!(ds.values_at("visibility_sl", StepOffset::ZERO), None);
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = dataset(vec![1.0; 8]);
        let b = dataset(vec![1.0; 8]);
        assert_eq!(a.content_digest(), b.content_digest());

        let mut values = vec![1.0; 8];
        values[7] = 1.5;
        assert_ne!(a.content_digest(), dataset(values).content_digest());
    }

    #[test]
    fn test_digest_ignores_nan_payload() {
        let mut x = vec![1.0; 8];
        let mut y = vec![1.0; 8];
        x[0] = f32::NAN;
        y[0] = f32::from_bits(0x7fc0_0001);
        assert_eq!(dataset(x).content_digest(), dataset(y).content_digest());
    }

    #[test]
    fn test_reindexed_widens_axis() {
        let ds = dataset(vec![1.0; 8]);
        let wide = ds.reindexed(&hours(&[0, 1, 3])).unwrap();
        assert_eq!(wide.steps().len(), 3);
        let tail = wide
            .values_at("temperature_sl", StepOffset::from_hours(3))
            .unwrap();
        assert!(tail.iter().all(|v| is_missing(*v)));
    }
}
