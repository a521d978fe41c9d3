//! Decoded fields through catalog resolution and the dataset builder.

use ingestion::{resolve_fields, BuildError, DatasetBuilder, DecodedField, ParameterCatalog};
use nwp_common::{FileDescriptor, GridCoordinate, StepOffset};
use test_utils::{assert_all_missing, assert_approx_eq, grids, hours, init_times, variables};

fn field(raw_identifier: &str, step_hours: &[u32], grid: &GridCoordinate, value: f32) -> DecodedField {
    let steps = hours(step_hours);
    let values = vec![value; steps.len() * grid.points()];
    DecodedField {
        raw_identifier: raw_identifier.to_string(),
        level_type: 103,
        level_value: 2.0,
        units: None,
        steps,
        grid: grid.clone(),
        values,
    }
}

fn gfs_file(name: &str) -> FileDescriptor {
    FileDescriptor::new("noaa-gfs", init_times::t0(), format!("gfs.20240101/00/{}", name))
}

#[test]
fn test_split_files_build_one_dataset() {
    let catalog = ParameterCatalog::builtin().unwrap();
    let grid = grids::small_latlon();

    let mut records = resolve_fields(
        &catalog,
        &gfs_file("f1.grib2"),
        vec![field("0.0.0", &[0, 1, 2], &grid, 280.0)],
    )
    .unwrap();
    records.extend(
        resolve_fields(
            &catalog,
            &gfs_file("f2.grib2"),
            vec![field("0.1.1", &[0, 1], &grid, 55.0)],
        )
        .unwrap(),
    );

    let output = DatasetBuilder::new(init_times::t0())
        .with_limits(&catalog)
        .build(records)
        .unwrap();
    assert!(output.report.is_clean());

    let ds = output.dataset;
    assert_eq!(ds.steps(), hours(&[0, 1, 2]).as_slice());
    assert_eq!(ds.variable(variables::TEMPERATURE).unwrap().units, "K");
    assert_eq!(
        ds.values_at(variables::HUMIDITY, StepOffset::from_hours(1))
            .unwrap()[0],
        55.0
    );
    assert_all_missing!(ds
        .values_at(variables::HUMIDITY, StepOffset::from_hours(2))
        .unwrap());
}

#[test]
fn test_undeclared_identifier_fails_resolution() {
    let catalog = ParameterCatalog::builtin().unwrap();
    let err = resolve_fields(
        &catalog,
        &gfs_file("f1.grib2"),
        vec![field("0.99.99", &[0], &grids::small_latlon(), 1.0)],
    )
    .unwrap_err();
    assert_eq!(err.provider, "noaa-gfs");
    assert_eq!(err.raw_identifier, "0.99.99");
}

#[test]
fn test_files_on_different_grids_fail_the_init_time() {
    let catalog = ParameterCatalog::builtin().unwrap();
    let mut records = resolve_fields(
        &catalog,
        &gfs_file("f1.grib2"),
        vec![field("0.0.0", &[0], &grids::small_latlon(), 280.0)],
    )
    .unwrap();
    records.extend(
        resolve_fields(
            &catalog,
            &gfs_file("f2.grib2"),
            vec![field("0.1.1", &[0], &grids::shifted_latlon(), 55.0)],
        )
        .unwrap(),
    );

    let err = DatasetBuilder::new(init_times::t0()).build(records).unwrap_err();
    assert!(matches!(err, BuildError::GridMismatch(_)));
}

#[test]
fn test_out_of_limit_values_are_reported() {
    let catalog = ParameterCatalog::builtin().unwrap();
    let records = resolve_fields(
        &catalog,
        &gfs_file("f1.grib2"),
        vec![field("0.0.0", &[0, 1], &grids::small_latlon(), 1000.0)],
    )
    .unwrap();

    let output = DatasetBuilder::new(init_times::t0())
        .with_limits(&catalog)
        .build(records)
        .unwrap();
    assert_eq!(output.report.limit_warnings.len(), 1);
    assert_eq!(
        output.report.limit_warnings[0].variable.as_str(),
        variables::TEMPERATURE
    );
    let scan = output.report.limit_warnings[0].scan;
    assert!(!scan.is_valid);
    assert!(!scan.has_nulls);
    assert_approx_eq!(scan.mean, 1000.0, 1e-6);
    assert_approx_eq!(scan.out_of_limits_ratio, 1.0, 1e-9);
    assert_eq!(output.dataset.len(), 1);
}
