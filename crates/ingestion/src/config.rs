//! Ingestion constants shared by the catalog tables and the GRIB2 decoder.

/// GRIB2 fixed-surface type codes (WMO code table 4.5).
pub mod level_types {
    /// Ground or water surface
    pub const SURFACE: u8 = 1;
    /// Cloud base
    pub const CLOUD_BASE: u8 = 2;
    /// Nominal top of the atmosphere
    pub const TOP_OF_ATMOSPHERE: u8 = 8;
    /// Entire atmosphere considered as a single layer
    pub const ENTIRE_ATMOSPHERE_LAYER: u8 = 10;
    /// Isobaric (pressure) level
    pub const ISOBARIC: u8 = 100;
    /// Mean sea level
    pub const MSL: u8 = 101;
    /// Height above ground
    pub const HEIGHT_ABOVE_GROUND: u8 = 103;
    /// Entire atmosphere
    pub const ENTIRE_ATMOSPHERE: u8 = 200;
    /// Low cloud layer
    pub const LOW_CLOUD_LAYER: u8 = 214;
    /// Middle cloud layer
    pub const MIDDLE_CLOUD_LAYER: u8 = 224;
    /// High cloud layer
    pub const HIGH_CLOUD_LAYER: u8 = 234;
    /// Missing / not applicable
    pub const MISSING: u8 = 255;

    /// Map a level name used in catalog files to its code.
    pub fn from_name(name: &str) -> Option<u8> {
        match name.to_lowercase().as_str() {
            "surface" => Some(SURFACE),
            "cloud_base" => Some(CLOUD_BASE),
            "top_of_atmosphere" => Some(TOP_OF_ATMOSPHERE),
            "entire_atmosphere_layer" => Some(ENTIRE_ATMOSPHERE_LAYER),
            "isobaric" => Some(ISOBARIC),
            "mean_sea_level" | "msl" => Some(MSL),
            "height_above_ground" => Some(HEIGHT_ABOVE_GROUND),
            "entire_atmosphere" => Some(ENTIRE_ATMOSPHERE),
            "low_cloud_layer" => Some(LOW_CLOUD_LAYER),
            "middle_cloud_layer" => Some(MIDDLE_CLOUD_LAYER),
            "high_cloud_layer" => Some(HIGH_CLOUD_LAYER),
            _ => None,
        }
    }
}

/// Fraction of out-of-limit values tolerated before a parameter scan is
/// flagged.
pub const DEFAULT_LIMIT_THRESHOLD: f64 = 0.05;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_type_values() {
        assert_eq!(level_types::SURFACE, 1);
        assert_eq!(level_types::ISOBARIC, 100);
        assert_eq!(level_types::HEIGHT_ABOVE_GROUND, 103);
        assert_eq!(level_types::HIGH_CLOUD_LAYER, 234);
    }

    #[test]
    fn test_level_type_names() {
        assert_eq!(
            level_types::from_name("height_above_ground"),
            Some(level_types::HEIGHT_ABOVE_GROUND)
        );
        assert_eq!(level_types::from_name("MSL"), Some(level_types::MSL));
        assert_eq!(level_types::from_name("stratosphere"), None);
    }
}
