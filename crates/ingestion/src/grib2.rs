//! GRIB2 decoding.
//!
//! Every submessage of a file becomes one step of a field. Submessages are
//! grouped by parameter identity (`discipline.category.number`) and first
//! fixed surface, so a file holding several forecast steps of the same
//! parameter yields a single multi-step [`DecodedField`].

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use grib::codetables::grib2::*;
use grib::codetables::*;
use grib::{
    GaussianGridDefinition, GridDefinitionTemplateValues, LambertGridDefinition,
    PolarStereographicGridDefinition,
};
use nwp_common::{quantize, Axis, FileDescriptor, GridCoordinate, StepOffset};
use tracing::{debug, warn};

use crate::catalog::ParameterCatalog;
use crate::config::level_types;
use crate::decoder::{DecodedField, Decoder};
use crate::error::{DecodeError, IngestionError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// [`Decoder`] for GRIB2 files, optionally gzip-wrapped.
///
/// Provider files usually hold far more parameters than the catalog
/// consolidates. With a catalog filter, submessages the provider's rules do
/// not declare (see [`ParameterCatalog::declares`]) are skipped before
/// unpacking.
#[derive(Debug, Clone, Default)]
pub struct GribDecoder {
    filter: Option<Arc<ParameterCatalog>>,
}

impl GribDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only decode submessages the catalog declares for the file's provider.
    pub fn filtered(catalog: Arc<ParameterCatalog>) -> Self {
        Self {
            filter: Some(catalog),
        }
    }

    fn should_decode(
        &self,
        provider: &str,
        raw_identifier: &str,
        level_type: u8,
        level_value: f64,
    ) -> bool {
        match &self.filter {
            Some(catalog) => catalog.declares(provider, raw_identifier, level_type, level_value),
            None => true,
        }
    }
}

/// One decoded submessage.
struct Slab {
    step: StepOffset,
    grid: GridCoordinate,
    values: Vec<f32>,
}

/// Submessages sharing a parameter identity and level.
struct FieldGroup {
    raw_identifier: String,
    level_type: u8,
    level_value: f64,
    slabs: Vec<Slab>,
}

impl Decoder for GribDecoder {
    fn decode(&self, file: &FileDescriptor, data: Bytes) -> std::result::Result<Vec<DecodedField>, DecodeError> {
        let data = if data.starts_with(&GZIP_MAGIC) || file.is_gzipped() {
            decompress_gzip(&data).map_err(|e| DecodeError::new(&file.provider, e.to_string()))?
        } else {
            data
        };

        let grib_file = grib::from_reader(Cursor::new(data.as_ref())).map_err(|e| {
            DecodeError::new(
                &file.provider,
                format!("{} is not a readable GRIB2 file: {}", file.path, e),
            )
        })?;

        let mut groups: BTreeMap<(String, u8, i64), FieldGroup> = BTreeMap::new();
        let mut submessages = 0usize;
        let mut skipped = 0usize;

        for ((msg_idx, sub_idx), submsg) in grib_file.iter() {
            submessages += 1;

            let discipline = submsg.indicator().discipline;
            let prod_def = submsg.prod_def();
            let (category, number) =
                match (prod_def.parameter_category(), prod_def.parameter_number()) {
                    (Some(c), Some(n)) => (c, n),
                    _ => {
                        debug!(msg_idx, sub_idx, "Submessage without parameter identity, skipping");
                        skipped += 1;
                        continue;
                    }
                };
            let raw_identifier = format!("{}.{}.{}", discipline, category, number);

            let (level_type, level_value) = match prod_def.fixed_surfaces() {
                Some((first, _second)) => {
                    let value = first.value();
                    (
                        first.surface_type,
                        if value.is_finite() { value } else { 0.0 },
                    )
                }
                None => (level_types::MISSING, 0.0),
            };

            if !self.should_decode(&file.provider, &raw_identifier, level_type, level_value) {
                skipped += 1;
                continue;
            }

            let step = match prod_def.forecast_time() {
                Some(ft) => match forecast_step(&ft.unit, ft.value) {
                    Some(step) => step,
                    None => {
                        warn!(
                            path = %file.path,
                            parameter = %raw_identifier,
                            value = ft.value,
                            "Unsupported or out-of-range forecast time, skipping submessage"
                        );
                        skipped += 1;
                        continue;
                    }
                },
                None => StepOffset::ZERO,
            };

            let grid = match (|| -> std::result::Result<GridCoordinate, String> {
                let (ni, nj) = submsg.grid_shape().map_err(|e| e.to_string())?;
                let template = GridDefinitionTemplateValues::try_from(submsg.grid_def())
                    .map_err(|e| e.to_string())?;
                match template {
                    GridDefinitionTemplateValues::Template0(_) => {
                        let points: Vec<(f32, f32)> =
                            submsg.latlons().map_err(|e| e.to_string())?.collect();
                        lat_lon_grid(&points, ni, nj)
                    }
                    GridDefinitionTemplateValues::Template20(def) => {
                        projected_grid(&Projection::polar_stereographic(&def), ni, nj)
                    }
                    GridDefinitionTemplateValues::Template30(def) => {
                        projected_grid(&Projection::lambert(&def), ni, nj)
                    }
                    GridDefinitionTemplateValues::Template40(def) => gaussian_grid(&def, ni, nj),
                }
            })() {
                Ok(grid) => grid,
                Err(reason) => {
                    warn!(
                        path = %file.path,
                        parameter = %raw_identifier,
                        reason = %reason,
                        "Unusable grid definition, skipping submessage"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let values: Vec<f32> = match grib::Grib2SubmessageDecoder::from(submsg) {
                Ok(decoder) => match decoder.dispatch() {
                    Ok(values) => values.collect(),
                    Err(e) => {
                        warn!(error = %e, parameter = %raw_identifier, "Failed to unpack GRIB2 data, skipping");
                        skipped += 1;
                        continue;
                    }
                },
                Err(e) => {
                    warn!(error = %e, parameter = %raw_identifier, "Failed to unpack GRIB2 data, skipping");
                    skipped += 1;
                    continue;
                }
            };

            if values.len() != grid.points() {
                warn!(
                    expected = grid.points(),
                    actual = values.len(),
                    parameter = %raw_identifier,
                    "Grid data size mismatch, skipping"
                );
                skipped += 1;
                continue;
            }

            let group = groups
                .entry((raw_identifier.clone(), level_type, quantize(level_value)))
                .or_insert_with(|| FieldGroup {
                    raw_identifier,
                    level_type,
                    level_value,
                    slabs: Vec::new(),
                });
            group.slabs.push(Slab { step, grid, values });
        }

        let fields: Vec<DecodedField> = groups
            .into_values()
            .filter_map(|group| assemble_field(file, group))
            .collect();

        debug!(
            path = %file.path,
            submessages,
            skipped,
            fields = fields.len(),
            "Decoded GRIB2 file"
        );

        if fields.is_empty() {
            return Err(DecodeError::new(
                &file.provider,
                format!("{} holds no decodable fields ({} submessages)", file.path, submessages),
            ));
        }

        Ok(fields)
    }
}

/// Stack the slabs of a group along ascending steps.
///
/// A repeated step keeps the first slab. Slabs on a grid different from the
/// first are dropped.
fn assemble_field(file: &FileDescriptor, group: FieldGroup) -> Option<DecodedField> {
    let mut slabs = group.slabs;
    // Stable sort keeps file order among equal steps
    slabs.sort_by_key(|s| s.step);

    let grid = slabs.first()?.grid.clone();
    let mut steps = Vec::with_capacity(slabs.len());
    let mut values = Vec::with_capacity(slabs.len() * grid.points());

    for slab in slabs {
        if steps.last() == Some(&slab.step) {
            warn!(
                path = %file.path,
                parameter = %group.raw_identifier,
                step = %slab.step,
                "Repeated step in file, keeping the first"
            );
            continue;
        }
        if !slab.grid.is_compatible(&grid) {
            warn!(
                path = %file.path,
                parameter = %group.raw_identifier,
                expected = %grid,
                found = %slab.grid,
                "Step on a different grid, skipping"
            );
            continue;
        }
        steps.push(slab.step);
        values.extend_from_slice(&slab.values);
    }

    Some(DecodedField {
        raw_identifier: group.raw_identifier,
        level_type: group.level_type,
        level_value: group.level_value,
        units: None,
        steps,
        grid,
        values,
    })
}

/// Lead time from a forecast time in hours, minutes or days.
fn forecast_step(unit: &Code<Table4_4, u8>, value: u32) -> Option<StepOffset> {
    match unit {
        Name(Table4_4::Minute) => Some(StepOffset::from_minutes(value)),
        Name(Table4_4::Hour) => StepOffset::checked_from_hours(value),
        Name(Table4_4::Day) => value.checked_mul(24).and_then(StepOffset::checked_from_hours),
        _ => None,
    }
}

/// GRIB2 angles are stored in 10^-6 degrees.
fn degrees(micro: i32) -> f64 {
    f64::from(micro) * 1e-6
}

/// Map projection of a template 3.20 or 3.30 grid.
#[derive(Debug, Clone, PartialEq)]
struct Projection {
    /// PROJ name of the projection
    proj: &'static str,
    /// Projection parameters in degrees
    parameters: Vec<(&'static str, f64)>,
    /// Latitude and longitude of the first grid point
    first_point: (f64, f64),
    /// Grid spacing in metres along x and y
    dx: f64,
    dy: f64,
    i_positive: bool,
    j_positive: bool,
}

impl Projection {
    fn lambert(def: &LambertGridDefinition) -> Self {
        Self {
            proj: "lcc",
            parameters: vec![
                ("lat_0", degrees(def.lad)),
                ("lon_0", degrees(def.lov)),
                ("lat_1", degrees(def.latin1)),
                ("lat_2", degrees(def.latin2)),
            ],
            first_point: (degrees(def.first_point_lat), degrees(def.first_point_lon)),
            dx: f64::from(def.dx) / 1000.0,
            dy: f64::from(def.dy) / 1000.0,
            i_positive: def.scanning_mode.scans_positively_for_i(),
            j_positive: def.scanning_mode.scans_positively_for_j(),
        }
    }

    fn polar_stereographic(def: &PolarStereographicGridDefinition) -> Self {
        let pole = if def.projection_centre.contains_north_pole_on_projection_plane() {
            90.0
        } else {
            -90.0
        };
        Self {
            proj: "stere",
            parameters: vec![
                ("lat_0", pole),
                ("lat_ts", degrees(def.lad)),
                ("lon_0", degrees(def.lov)),
            ],
            first_point: (degrees(def.first_point_lat), degrees(def.first_point_lon)),
            dx: f64::from(def.dx) / 1000.0,
            dy: f64::from(def.dy) / 1000.0,
            i_positive: def.scanning_mode.scans_positively_for_i(),
            j_positive: def.scanning_mode.scans_positively_for_j(),
        }
    }

    /// PROJ-style description, anchored at the first grid point.
    fn crs(&self) -> String {
        let mut crs = format!("+proj={}", self.proj);
        for (name, value) in &self.parameters {
            crs.push_str(&format!(" +{}={:.6}", name, value));
        }
        crs.push_str(&format!(
            " +first_point={:.6},{:.6}",
            self.first_point.0, self.first_point.1
        ));
        crs
    }
}

/// Projected grid with axes in metres from the first grid point.
fn projected_grid(
    projection: &Projection,
    ni: usize,
    nj: usize,
) -> std::result::Result<GridCoordinate, String> {
    if ni == 0 || nj == 0 {
        return Err(format!("empty grid {}x{}", ni, nj));
    }
    if projection.dx <= 0.0 || projection.dy <= 0.0 {
        return Err(format!(
            "non-positive grid spacing {}x{} m",
            projection.dx, projection.dy
        ));
    }
    let signed = |spacing: f64, positive: bool| if positive { spacing } else { -spacing };
    Ok(GridCoordinate::projected(
        projection.crs(),
        Axis::new(0.0, signed(projection.dy, projection.j_positive), nj),
        Axis::new(0.0, signed(projection.dx, projection.i_positive), ni),
    ))
}

/// Gaussian grid: regular longitudes, latitude rows indexed and pinned by
/// `N` and the corner points in the CRS.
fn gaussian_grid(
    def: &GaussianGridDefinition,
    ni: usize,
    nj: usize,
) -> std::result::Result<GridCoordinate, String> {
    if ni == 0 || nj == 0 {
        return Err(format!("empty grid {}x{}", ni, nj));
    }
    let lon_step = degrees(i32::try_from(def.i_direction_inc).map_err(|e| e.to_string())?);
    let lon_step = if def.scanning_mode.scans_positively_for_i() {
        lon_step
    } else {
        -lon_step
    };
    let crs = format!(
        "gaussian(N={}) +first_point={:.6},{:.6} +last_point={:.6},{:.6}",
        def.n,
        degrees(def.first_point_lat),
        degrees(def.first_point_lon),
        degrees(def.last_point_lat),
        degrees(def.last_point_lon)
    );
    Ok(GridCoordinate::projected(
        crs,
        Axis::new(0.0, 1.0, nj),
        Axis::new(degrees(def.first_point_lon), lon_step, ni),
    ))
}

/// Regular lat/lon axes from the scan-ordered coordinates of a 3.0 grid.
fn lat_lon_grid(
    points: &[(f32, f32)],
    ni: usize,
    nj: usize,
) -> std::result::Result<GridCoordinate, String> {
    if ni == 0 || nj == 0 {
        return Err(format!("empty grid {}x{}", ni, nj));
    }
    if points.len() != ni * nj {
        return Err(format!(
            "{} coordinates for a {}x{} grid",
            points.len(),
            ni,
            nj
        ));
    }

    // Spacing from the axis extremes rather than neighbours, to limit f32 error
    let (lat0, lon0) = (f64::from(points[0].0), f64::from(points[0].1));
    let lon_step = if ni > 1 {
        (f64::from(points[ni - 1].1) - lon0) / (ni - 1) as f64
    } else {
        0.0
    };
    let lat_step = if nj > 1 {
        (f64::from(points[(nj - 1) * ni].0) - lat0) / (nj - 1) as f64
    } else {
        0.0
    };

    Ok(GridCoordinate::lat_lon(
        Axis::new(lat0, lat_step, nj),
        Axis::new(lon0, lon_step, ni),
    ))
}

/// Decompress gzip-compressed GRIB2 data.
pub fn decompress_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| IngestionError::Decompression(e.to_string()))?;
    Ok(Bytes::from(decompressed))
}
