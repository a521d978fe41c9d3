//! Canonical dataset assembly for one init time.
//!
//! Records arrive per variable, each on its own step axis. The builder
//! unions those axes, moves every variable onto the union (missing values
//! where a variable has no data) and checks that all variables share one
//! grid. It either returns a complete dataset or an error; nothing partially
//! reindexed escapes.

use std::collections::{BTreeMap, BTreeSet};

use nwp_common::{
    reindex_steps, CanonicalDataset, DataVariable, FileDescriptor, InitTime, RawRecord,
    StepOffset, VariableKey,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::catalog::{LimitWarning, ParameterCatalog};
use crate::decoder::DecodedField;
use crate::error::{BuildError, DuplicateVariableError, GridMismatchError, ResolutionError};

/// Non-fatal findings of a build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Records dropped because an earlier record had the same variable
    pub duplicates: Vec<DuplicateVariableError>,
    /// Variables failing their physical-limit scan (data kept as is)
    pub limit_warnings: Vec<LimitWarning>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.limit_warnings.is_empty()
    }
}

/// A built dataset with its report.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub dataset: CanonicalDataset,
    pub report: BuildReport,
}

/// Folds the records of one init time into a [`CanonicalDataset`].
#[derive(Debug, Clone, Copy)]
pub struct DatasetBuilder<'a> {
    init_time: InitTime,
    limits: Option<&'a ParameterCatalog>,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(init_time: InitTime) -> Self {
        Self {
            init_time,
            limits: None,
        }
    }

    /// Scan each variable against the catalog's physical limits.
    pub fn with_limits(mut self, catalog: &'a ParameterCatalog) -> Self {
        self.limits = Some(catalog);
        self
    }

    pub fn build(&self, records: Vec<RawRecord>) -> Result<BuildOutput, BuildError> {
        if records.is_empty() {
            return Err(BuildError::Empty(self.init_time));
        }

        for record in &records {
            self.validate_record(record)?;
        }

        let mut report = BuildReport::default();

        // Partition by variable, first record wins
        let mut partitions: BTreeMap<VariableKey, RawRecord> = BTreeMap::new();
        for record in records {
            if partitions.contains_key(&record.variable) {
                let duplicate = DuplicateVariableError {
                    init_time: self.init_time,
                    variable: record.variable.clone(),
                };
                warn!(
                    init_time = %self.init_time,
                    variable = %record.variable,
                    "{}",
                    duplicate
                );
                report.duplicates.push(duplicate);
                continue;
            }
            partitions.insert(record.variable.clone(), record);
        }

        // All variables must share the grid of the first one
        let mut iter = partitions.values();
        let reference = match iter.next() {
            Some(first) => first,
            None => return Err(BuildError::Empty(self.init_time)),
        };
        for record in iter {
            if !record.grid.is_compatible(&reference.grid) {
                return Err(GridMismatchError {
                    init_time: self.init_time,
                    variable: record.variable.clone(),
                    expected: reference.grid.to_string(),
                    found: record.grid.to_string(),
                }
                .into());
            }
        }
        let grid = reference.grid.clone();
        let points = grid.points();

        let steps: Vec<StepOffset> = partitions
            .values()
            .flat_map(|r| r.steps.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let reindexed: Vec<(VariableKey, DataVariable)> = partitions
            .into_par_iter()
            .map(|(key, record)| -> Result<(VariableKey, DataVariable), BuildError> {
                let values = if record.steps == steps {
                    record.values
                } else {
                    reindex_steps(&record.values, &record.steps, &steps, points)?
                };
                Ok((key, DataVariable::new(record.units, values)))
            })
            .collect::<Result<_, BuildError>>()?;

        if let Some(catalog) = self.limits {
            for (key, variable) in &reindexed {
                let Some(scan) = catalog.scan(key.as_str(), &variable.values) else {
                    continue;
                };
                if !scan.is_valid {
                    warn!(
                        init_time = %self.init_time,
                        variable = %key,
                        mean = scan.mean,
                        out_of_limits_ratio = scan.out_of_limits_ratio,
                        "Variable fails its physical limit scan"
                    );
                    report.limit_warnings.push(LimitWarning {
                        variable: key.clone(),
                        scan,
                    });
                }
            }
        }

        let variable_count = reindexed.len();
        let dataset = CanonicalDataset::try_new(
            self.init_time,
            steps,
            grid,
            reindexed.into_iter().collect(),
        )?;

        info!(
            init_time = %self.init_time,
            variables = variable_count,
            steps = dataset.steps().len(),
            duplicates = report.duplicates.len(),
            "Built canonical dataset"
        );

        Ok(BuildOutput { dataset, report })
    }

    fn validate_record(&self, record: &RawRecord) -> Result<(), BuildError> {
        if record.init_time != self.init_time {
            return Err(BuildError::InitTimeMismatch {
                expected: self.init_time,
                found: record.init_time,
                variable: record.variable.clone(),
            });
        }
        if record.steps.is_empty() {
            return Err(BuildError::MalformedRecord {
                variable: record.variable.clone(),
                reason: "no steps".to_string(),
            });
        }
        if record.steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BuildError::MalformedRecord {
                variable: record.variable.clone(),
                reason: "steps are not strictly increasing".to_string(),
            });
        }
        if record.values.len() != record.expected_len() {
            return Err(BuildError::MalformedRecord {
                variable: record.variable.clone(),
                reason: format!(
                    "{} values for {} steps of {} points",
                    record.values.len(),
                    record.steps.len(),
                    record.grid.points()
                ),
            });
        }
        Ok(())
    }
}

/// Resolve decoded fields of one file into records.
///
/// Units come from the field when the file reports them, otherwise from the
/// provider's declared native units. A mismatch with the canonical units is
/// logged, never converted.
pub fn resolve_fields(
    catalog: &ParameterCatalog,
    file: &FileDescriptor,
    fields: Vec<DecodedField>,
) -> Result<Vec<RawRecord>, ResolutionError> {
    let mut records = Vec::with_capacity(fields.len());
    for field in fields {
        let entry = catalog.resolve_entry(
            &file.provider,
            &field.raw_identifier,
            field.level_type,
            field.level_value,
        )?;
        let units = field
            .units
            .unwrap_or_else(|| entry.native_units.to_string());
        catalog.check_units(entry.key, &units);

        debug!(
            path = %file.path,
            raw_identifier = %field.raw_identifier,
            variable = %entry.key,
            steps = field.steps.len(),
            "Resolved field"
        );

        records.push(RawRecord {
            init_time: file.init_time,
            steps: field.steps,
            grid: field.grid,
            variable: entry.key.clone(),
            units,
            values: field.values,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwp_common::{is_missing, Axis, GridCoordinate};

    fn init_time() -> InitTime {
        InitTime::from_ymd_h(2024, 3, 1, 6).unwrap()
    }

    fn grid() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(50.0, -1.0, 2), Axis::new(0.0, 1.0, 3))
    }

    fn record(name: &str, hours: &[u32], fill: f32) -> RawRecord {
        let steps: Vec<StepOffset> = hours.iter().map(|h| StepOffset::from_hours(*h)).collect();
        let values = steps
            .iter()
            .flat_map(|s| vec![fill + s.minutes() as f32; 6])
            .collect();
        RawRecord {
            init_time: init_time(),
            steps,
            grid: grid(),
            variable: VariableKey::new(name).unwrap(),
            units: "K".into(),
            values,
        }
    }

    #[test]
    fn test_build_unions_step_axes() {
        let output = DatasetBuilder::new(init_time())
            .build(vec![
                record("temperature_sl", &[0, 1, 2], 280.0),
                record("relative_humidity_sl", &[0, 1], 50.0),
            ])
            .unwrap();

        let ds = output.dataset;
        assert_eq!(
            ds.steps(),
            &[
                StepOffset::ZERO,
                StepOffset::from_hours(1),
                StepOffset::from_hours(2)
            ]
        );
        let rh = ds
            .values_at("relative_humidity_sl", StepOffset::from_hours(2))
            .unwrap();
        assert!(rh.iter().all(|v| is_missing(*v)));
        let rh = ds
            .values_at("relative_humidity_sl", StepOffset::from_hours(1))
            .unwrap();
        assert!(rh.iter().all(|v| *v == 110.0));
        assert!(output.report.is_clean());
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let output = DatasetBuilder::new(init_time())
            .build(vec![
                record("temperature_sl", &[0], 280.0),
                record("temperature_sl", &[0], 300.0),
            ])
            .unwrap();

        assert_eq!(output.report.duplicates.len(), 1);
        let t = output
            .dataset
            .values_at("temperature_sl", StepOffset::ZERO)
            .unwrap();
        assert_eq!(t[0], 280.0);
    }

    #[test]
    fn test_grid_mismatch_is_fatal() {
        let mut other = record("relative_humidity_sl", &[0], 50.0);
        other.grid = GridCoordinate::lat_lon(Axis::new(51.0, -1.0, 2), Axis::new(0.0, 1.0, 3));

        let err = DatasetBuilder::new(init_time())
            .build(vec![record("temperature_sl", &[0], 280.0), other])
            .unwrap_err();
        assert!(matches!(err, BuildError::GridMismatch(_)));
    }

    #[test]
    fn test_empty_input() {
        let err = DatasetBuilder::new(init_time()).build(vec![]).unwrap_err();
        assert!(matches!(err, BuildError::Empty(_)));
    }

    #[test]
    fn test_init_time_mismatch() {
        let mut r = record("temperature_sl", &[0], 280.0);
        r.init_time = InitTime::from_ymd_h(2024, 3, 1, 12).unwrap();
        let err = DatasetBuilder::new(init_time()).build(vec![r]).unwrap_err();
        assert!(matches!(err, BuildError::InitTimeMismatch { .. }));
    }

    #[test]
    fn test_malformed_records() {
        let mut short = record("temperature_sl", &[0, 1], 280.0);
        short.values.pop();
        assert!(matches!(
            DatasetBuilder::new(init_time()).build(vec![short]),
            Err(BuildError::MalformedRecord { .. })
        ));

        let mut unsorted = record("temperature_sl", &[0, 1], 280.0);
        unsorted.steps.reverse();
        assert!(matches!(
            DatasetBuilder::new(init_time()).build(vec![unsorted]),
            Err(BuildError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_limit_scan_reports_without_altering() {
        let catalog = ParameterCatalog::builtin().unwrap();
        // 5 K is far below the temperature limits
        let output = DatasetBuilder::new(init_time())
            .with_limits(&catalog)
            .build(vec![record("temperature_sl", &[0], 5.0)])
            .unwrap();

        assert_eq!(output.report.limit_warnings.len(), 1);
        assert_eq!(
            output.report.limit_warnings[0].variable.as_str(),
            "temperature_sl"
        );
        let t = output
            .dataset
            .values_at("temperature_sl", StepOffset::ZERO)
            .unwrap();
        assert_eq!(t[0], 5.0);
    }

    #[test]
    fn test_resolve_fields() {
        let catalog = ParameterCatalog::builtin().unwrap();
        let file = FileDescriptor::new("noaa-gfs", init_time(), "gfs.t06z.pgrb2.0p25.f000");
        let field = DecodedField {
            raw_identifier: "0.6.1".into(),
            level_type: crate::level_types::HIGH_CLOUD_LAYER,
            level_value: 0.0,
            units: None,
            steps: vec![StepOffset::ZERO],
            grid: grid(),
            values: vec![10.0; 6],
        };

        let records = resolve_fields(&catalog, &file, vec![field.clone()]).unwrap();
        assert_eq!(records[0].variable.as_str(), "cloud_cover_high");
        // Native units of the provider are carried, not converted
        assert_eq!(records[0].units, "%");
        assert_eq!(records[0].init_time, init_time());

        let mut unknown = field;
        unknown.raw_identifier = "0.6.99".into();
        let err = resolve_fields(&catalog, &file, vec![unknown]).unwrap_err();
        assert_eq!(err.raw_identifier, "0.6.99");
    }
}
