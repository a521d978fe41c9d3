//! Object paths of a store.
//!
//! ```text
//! <provider>/v<version>/schema.json
//! <provider>/v<version>/manifest.json
//! <provider>/v<version>/slices/<init_key>/<generation>/<variable>/...
//! ```

use nwp_common::{InitTime, VariableKey};

pub const SCHEMA_FILE: &str = "schema.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SLICES_DIR: &str = "slices";

/// Path builder for one logical dataset key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: String,
}

impl StorePaths {
    pub fn new(provider: &str, schema_version: u32) -> Self {
        Self {
            root: format!("{}/v{}", provider, schema_version),
        }
    }

    /// The dataset key, which is also the root prefix.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn schema(&self) -> String {
        format!("{}/{}", self.root, SCHEMA_FILE)
    }

    pub fn manifest(&self) -> String {
        format!("{}/{}", self.root, MANIFEST_FILE)
    }

    pub fn slices(&self) -> String {
        format!("{}/{}", self.root, SLICES_DIR)
    }

    pub fn generation(&self, init_time: InitTime, generation: &str) -> String {
        format!("{}/{}/{}", self.slices(), init_time.key(), generation)
    }

    pub fn variable(&self, init_time: InitTime, generation: &str, variable: &VariableKey) -> String {
        format!("{}/{}", self.generation(init_time, generation), variable)
    }

    /// Split a path under [`slices`](Self::slices) into its init key and
    /// generation.
    pub fn parse_generation<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix(&self.slices())?.strip_prefix('/')?;
        let mut parts = rest.splitn(3, '/');
        let init_key = parts.next().filter(|s| !s.is_empty())?;
        let generation = parts.next().filter(|s| !s.is_empty())?;
        Some((init_key, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let paths = StorePaths::new("noaa-gfs", 1);
        let t = InitTime::from_ymd_h(2024, 1, 1, 6).unwrap();
        let v = VariableKey::new("temperature_sl").unwrap();

        assert_eq!(paths.root(), "noaa-gfs/v1");
        assert_eq!(paths.schema(), "noaa-gfs/v1/schema.json");
        assert_eq!(paths.manifest(), "noaa-gfs/v1/manifest.json");
        assert_eq!(
            paths.variable(t, "abc123", &v),
            "noaa-gfs/v1/slices/20240101T0600/abc123/temperature_sl"
        );
    }

    #[test]
    fn test_parse_generation() {
        let paths = StorePaths::new("noaa-gfs", 1);
        assert_eq!(
            paths.parse_generation("noaa-gfs/v1/slices/20240101T0600/abc/temperature_sl/zarr.json"),
            Some(("20240101T0600", "abc"))
        );
        assert_eq!(paths.parse_generation("noaa-gfs/v1/slices/20240101T0600"), None);
        assert_eq!(paths.parse_generation("noaa-gfs/v1/manifest.json"), None);
        assert_eq!(paths.parse_generation("ecmwf-ifs/v1/slices/x/y/z"), None);
    }
}
