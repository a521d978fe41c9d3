//! Common test fixtures for nwp-consumer tests.
//!
//! This module provides pre-defined init times and grids that represent
//! common scenarios in forecast consolidation.

/// Init times used across the test suite.
pub mod init_times {
    use nwp_common::InitTime;

    fn at(year: i32, month: u32, day: u32, hour: u32) -> InitTime {
        // Fixture dates are valid by construction
        InitTime::from_ymd_h(year, month, day, hour).expect("valid fixture init time")
    }

    /// 2024-01-01 00Z
    pub fn t0() -> InitTime {
        at(2024, 1, 1, 0)
    }

    /// 2024-01-01 06Z
    pub fn t1() -> InitTime {
        at(2024, 1, 1, 6)
    }

    /// 2024-01-01 12Z
    pub fn t2() -> InitTime {
        at(2024, 1, 1, 12)
    }

    /// 2024-01-01 18Z
    pub fn t3() -> InitTime {
        at(2024, 1, 1, 18)
    }
}

/// Common grid definitions for testing.
pub mod grids {
    use nwp_common::{Axis, GridCoordinate};

    /// Small 4x3 lat/lon grid over the UK, north to south
    pub fn small_latlon() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(60.0, -1.0, 4), Axis::new(-8.0, 1.0, 3))
    }

    /// Same shape as [`small_latlon`] but shifted one degree east
    pub fn shifted_latlon() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(60.0, -1.0, 4), Axis::new(-7.0, 1.0, 3))
    }

    /// UKV-like 2 km projected grid (5x6)
    pub fn small_projected() -> GridCoordinate {
        GridCoordinate::projected(
            "EPSG:27700",
            Axis::new(1_200_000.0, -2000.0, 5),
            Axis::new(-238_000.0, 2000.0, 6),
        )
    }

    /// GFS 0.25 degree global grid
    pub fn gfs_global() -> GridCoordinate {
        GridCoordinate::lat_lon(Axis::new(90.0, -0.25, 721), Axis::new(0.0, 0.25, 1440))
    }
}

/// Canonical variable names used across the test suite.
pub mod variables {
    pub const TEMPERATURE: &str = "temperature_sl";
    pub const HUMIDITY: &str = "relative_humidity_sl";
    pub const WIND_U_10M: &str = "wind_u_component_10m";
    pub const CLOUD_HIGH: &str = "cloud_cover_high";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_times_are_ordered() {
        assert!(init_times::t0() < init_times::t1());
        assert!(init_times::t1() < init_times::t2());
        assert!(init_times::t2() < init_times::t3());
    }

    #[test]
    fn test_grids_validate() {
        assert!(grids::small_latlon().validate().is_ok());
        assert!(grids::small_projected().validate().is_ok());
        assert_eq!(grids::gfs_global().points(), 721 * 1440);
        assert!(!grids::small_latlon().is_compatible(&grids::shifted_latlon()));
    }
}
