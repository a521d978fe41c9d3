//! Spatial grid definitions.
//!
//! Grids are compared after rounding coordinates to [`COORDINATE_DECIMALS`]
//! places (about 11 m), which is the precision coordinates are stored at.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NwpError, NwpResult};

/// Decimal places kept when comparing or storing coordinate values.
pub const COORDINATE_DECIMALS: i32 = 4;

/// Round a coordinate to the stored precision, as an integer count of
/// 10^-4 units.
pub fn quantize(value: f64) -> i64 {
    (value * 10f64.powi(COORDINATE_DECIMALS)).round() as i64
}

/// A regular, evenly spaced coordinate axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Axis {
    /// Coordinate of the first element
    pub start: f64,
    /// Spacing between consecutive elements (may be negative)
    pub step: f64,
    /// Number of elements
    pub count: usize,
}

impl Axis {
    pub fn new(start: f64, step: f64, count: usize) -> Self {
        Self { start, step, count }
    }

    /// Coordinate of the last element.
    pub fn end(&self) -> f64 {
        self.start + self.step * (self.count.saturating_sub(1)) as f64
    }

    /// All coordinate values, rounded to the stored precision.
    pub fn values(&self) -> Vec<f64> {
        let scale = 10f64.powi(COORDINATE_DECIMALS);
        (0..self.count)
            .map(|i| ((self.start + self.step * i as f64) * scale).round() / scale)
            .collect()
    }

    /// Two axes are compatible when count, origin and spacing agree at the
    /// stored precision.
    pub fn is_compatible(&self, other: &Axis) -> bool {
        self.count == other.count
            && quantize(self.start) == quantize(other.start)
            && (self.count <= 1 || quantize(self.step) == quantize(other.step))
    }

    fn validate(&self, name: &str) -> NwpResult<()> {
        if self.count == 0 {
            return Err(NwpError::invalid_grid(format!("{} axis is empty", name)));
        }
        if !self.start.is_finite() || !self.step.is_finite() {
            return Err(NwpError::invalid_grid(format!(
                "{} axis has non-finite coordinates",
                name
            )));
        }
        if self.count > 1 && quantize(self.step) == 0 {
            return Err(NwpError::invalid_grid(format!(
                "{} axis spacing {} is below coordinate precision",
                name, self.step
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x[{:.4}..{:.4} by {:.4}]", self.count, self.start, self.end(), self.step)
    }
}

/// The horizontal layout shared by every variable of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridCoordinate {
    /// Regular latitude/longitude grid (WGS84)
    LatLon { latitude: Axis, longitude: Axis },
    /// Rectilinear grid in a projected coordinate reference system
    Projected { crs: String, y: Axis, x: Axis },
    /// Unstructured point set, stored as a flat `values` dimension
    Unstructured { crs: String, points: usize },
}

impl GridCoordinate {
    pub fn lat_lon(latitude: Axis, longitude: Axis) -> Self {
        Self::LatLon {
            latitude,
            longitude,
        }
    }

    pub fn projected(crs: impl Into<String>, y: Axis, x: Axis) -> Self {
        Self::Projected {
            crs: crs.into(),
            y,
            x,
        }
    }

    /// Spatial dimension names in storage order.
    pub fn dimension_names(&self) -> &'static [&'static str] {
        match self {
            Self::LatLon { .. } => &["latitude", "longitude"],
            Self::Projected { .. } => &["y", "x"],
            Self::Unstructured { .. } => &["values"],
        }
    }

    /// Spatial shape in storage order.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::LatLon {
                latitude,
                longitude,
            } => vec![latitude.count, longitude.count],
            Self::Projected { y, x, .. } => vec![y.count, x.count],
            Self::Unstructured { points, .. } => vec![*points],
        }
    }

    /// Number of grid points.
    pub fn points(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn crs(&self) -> &str {
        match self {
            Self::LatLon { .. } => "EPSG:4326",
            Self::Projected { crs, .. } | Self::Unstructured { crs, .. } => crs,
        }
    }

    /// Check that the grid describes at least one point with usable axes.
    pub fn validate(&self) -> NwpResult<()> {
        match self {
            Self::LatLon {
                latitude,
                longitude,
            } => {
                latitude.validate("latitude")?;
                longitude.validate("longitude")
            }
            Self::Projected { y, x, .. } => {
                y.validate("y")?;
                x.validate("x")
            }
            Self::Unstructured { points, .. } => {
                if *points == 0 {
                    Err(NwpError::invalid_grid("unstructured grid has no points"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Exact compatibility on kind, shape, spacing, origin and projection.
    pub fn is_compatible(&self, other: &GridCoordinate) -> bool {
        match (self, other) {
            (
                Self::LatLon {
                    latitude: a_lat,
                    longitude: a_lon,
                },
                Self::LatLon {
                    latitude: b_lat,
                    longitude: b_lon,
                },
            ) => a_lat.is_compatible(b_lat) && a_lon.is_compatible(b_lon),
            (
                Self::Projected {
                    crs: a_crs,
                    y: a_y,
                    x: a_x,
                },
                Self::Projected {
                    crs: b_crs,
                    y: b_y,
                    x: b_x,
                },
            ) => a_crs == b_crs && a_y.is_compatible(b_y) && a_x.is_compatible(b_x),
            (
                Self::Unstructured {
                    crs: a_crs,
                    points: a_points,
                },
                Self::Unstructured {
                    crs: b_crs,
                    points: b_points,
                },
            ) => a_crs == b_crs && a_points == b_points,
            _ => false,
        }
    }
}

impl PartialEq for GridCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.is_compatible(other)
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatLon {
                latitude,
                longitude,
            } => write!(f, "latlon(lat {}, lon {})", latitude, longitude),
            Self::Projected { crs, y, x } => write!(f, "{}(y {}, x {})", crs, y, x),
            Self::Unstructured { crs, points } => write!(f, "{}({} points)", crs, points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_quarter_degree() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(90.0, -0.25, 721), Axis::new(0.0, 0.25, 1440))
    }

    #[test]
    fn test_shape_and_dimensions() {
        let grid = global_quarter_degree();
        assert_eq!(grid.shape(), vec![721, 1440]);
        assert_eq!(grid.points(), 721 * 1440);
        assert_eq!(grid.dimension_names(), &["latitude", "longitude"]);

        let points = GridCoordinate::Unstructured {
            crs: "icon".to_string(),
            points: 42,
        };
        assert_eq!(points.shape(), vec![42]);
        assert_eq!(points.dimension_names(), &["values"]);
    }

    #[test]
    fn test_compatibility_uses_stored_precision() {
        let a = global_quarter_degree();
        let b = GridCoordinate::lat_lon(
            Axis::new(90.000_01, -0.250_000_3, 721),
            Axis::new(0.000_02, 0.25, 1440),
        );
        assert!(a.is_compatible(&b));
        assert_eq!(a, b);

        let shifted = GridCoordinate::lat_lon(
            Axis::new(90.0, -0.25, 721),
            Axis::new(0.125, 0.25, 1440),
        );
        assert!(!a.is_compatible(&shifted));
    }

    #[test]
    fn test_kind_and_crs_must_match() {
        let latlon = GridCoordinate::lat_lon(Axis::new(0.0, 1.0, 3), Axis::new(0.0, 1.0, 4));
        let projected =
            GridCoordinate::projected("EPSG:27700", Axis::new(0.0, 1.0, 3), Axis::new(0.0, 1.0, 4));
        let other_crs =
            GridCoordinate::projected("EPSG:3857", Axis::new(0.0, 1.0, 3), Axis::new(0.0, 1.0, 4));
        assert!(!latlon.is_compatible(&projected));
        assert!(!projected.is_compatible(&other_crs));
    }

    #[test]
    fn test_axis_values_are_rounded() {
        let axis = Axis::new(49.999_98, 0.1, 3);
        assert_eq!(axis.values(), vec![50.0, 50.1, 50.2]);
        assert!((axis.end() - 50.199_98).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_degenerate_axes() {
        let empty = GridCoordinate::lat_lon(Axis::new(0.0, 1.0, 0), Axis::new(0.0, 1.0, 4));
        assert!(empty.validate().is_err());

        let flat = GridCoordinate::lat_lon(Axis::new(0.0, 0.000_01, 2), Axis::new(0.0, 1.0, 4));
        assert!(flat.validate().is_err());

        assert!(global_quarter_degree().validate().is_ok());
    }

    #[test]
    fn test_serde_tagged_representation() {
        let grid = GridCoordinate::projected(
            "EPSG:27700",
            Axis::new(1_223_000.0, -2000.0, 639),
            Axis::new(-239_000.0, 2000.0, 455),
        );
        let json = serde_json::to_value(&grid).unwrap();
        assert_eq!(json["kind"], "projected");
        let restored: GridCoordinate = serde_json::from_value(json).unwrap();
        assert_eq!(restored, grid);
    }
}
