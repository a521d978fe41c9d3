//! Consumer configuration from the environment.
//!
//! Required: `NWP_PROVIDER`, `NWP_STORE_URL`, and `NWP_RAW_DIR` for providers
//! without a remote fetcher. Everything else has a default. All missing
//! variables are reported at once.

use std::path::PathBuf;
use std::time::Duration;

use tensor_store::StoreConfig;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Provider with a built-in remote fetcher.
pub const NOAA_GFS: &str = "noaa-gfs";

/// Public NOAA GFS bucket.
pub const DEFAULT_GFS_BASE_URL: &str = "https://noaa-gfs-bdp-pds.s3.amazonaws.com";

/// Runtime configuration of the consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub provider: String,
    /// Store location (`file://`, path, `s3://bucket/prefix` or `memory://`)
    pub store_url: String,
    /// Local mirror of raw files, `<raw_dir>/<YYYYMMDDHH>/...`
    pub raw_dir: Option<PathBuf>,
    /// Base URL of the GFS bucket
    pub gfs_base_url: String,
    /// Catalog directory overriding the built-in tables
    pub catalog_dir: Option<PathBuf>,
    /// Init times prepared in parallel
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub merge_retries: u32,
    pub retry_base: Duration,
    /// Hours between model runs
    pub cycle_hours: u32,
    pub store: StoreConfig,
}

impl ConsumerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Build from a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();

        let provider = lookup("NWP_PROVIDER");
        if provider.is_none() {
            missing.push("NWP_PROVIDER".to_string());
        }
        let store_url = lookup("NWP_STORE_URL");
        if store_url.is_none() {
            missing.push("NWP_STORE_URL".to_string());
        }
        let raw_dir = lookup("NWP_RAW_DIR").map(PathBuf::from);
        if raw_dir.is_none() && provider.as_deref().is_some_and(|p| p != NOAA_GFS) {
            missing.push("NWP_RAW_DIR".to_string());
        }

        let (Some(provider), Some(store_url)) = (provider, store_url) else {
            return Err(ConfigError::Missing(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mut store = StoreConfig::from_lookup(&provider, &lookup).map_err(|e| {
            ConfigError::Invalid {
                var: "NWP_PROVIDER / NWP_*_CHUNK / NWP_COMPRESSION*".to_string(),
                message: e.to_string(),
            }
        })?;
        if let Some(val) = lookup("NWP_SCHEMA_VERSION") {
            store.schema_version = parse("NWP_SCHEMA_VERSION", &val)?;
        }

        let config = Self {
            provider,
            store_url,
            raw_dir,
            gfs_base_url: lookup("NWP_GFS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GFS_BASE_URL.to_string()),
            catalog_dir: lookup("NWP_CATALOG_DIR").map(PathBuf::from),
            concurrency: parse_or("NWP_CONCURRENCY", &lookup, 4)?,
            fetch_timeout: Duration::from_secs(parse_or("NWP_FETCH_TIMEOUT_SECS", &lookup, 300)?),
            merge_retries: parse_or("NWP_MERGE_RETRIES", &lookup, 3)?,
            retry_base: Duration::from_millis(parse_or("NWP_RETRY_BASE_MS", &lookup, 500)?),
            cycle_hours: parse_or("NWP_CYCLE_HOURS", &lookup, 6)?,
            store,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("NWP_CONCURRENCY", "must be > 0"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(invalid("NWP_FETCH_TIMEOUT_SECS", "must be > 0"));
        }
        if self.cycle_hours == 0 || 24 % self.cycle_hours != 0 {
            return Err(invalid("NWP_CYCLE_HOURS", "must divide 24"));
        }
        Ok(())
    }

    /// Retry policy for merges and transient fetch failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.merge_retries, self.retry_base)
    }
}

fn invalid(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        message: message.into(),
    }
}

fn parse<T: std::str::FromStr>(var: &str, val: &str) -> Result<T, ConfigError> {
    val.trim()
        .parse()
        .map_err(|_| invalid(var, format!("cannot parse '{}'", val)))
}

fn parse_or<T, F>(var: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(val) => parse(var, &val),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tensor_store::Compression;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::from_lookup(lookup(&[
            ("NWP_PROVIDER", "noaa-gfs"),
            ("NWP_STORE_URL", "memory://"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.fetch_timeout, Duration::from_secs(300));
        assert_eq!(config.merge_retries, 3);
        assert_eq!(config.retry_base, Duration::from_millis(500));
        assert_eq!(config.cycle_hours, 6);
        assert_eq!(config.gfs_base_url, DEFAULT_GFS_BASE_URL);
        assert!(config.raw_dir.is_none());
        assert_eq!(config.store.dataset_key(), "noaa-gfs/v1");
    }

    #[test]
    fn test_all_missing_reported() {
        let err = ConsumerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec!["NWP_PROVIDER".into(), "NWP_STORE_URL".into()])
        );
    }

    #[test]
    fn test_local_provider_needs_raw_dir() {
        let err = ConsumerConfig::from_lookup(lookup(&[("NWP_PROVIDER", "ceda-ukv")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec!["NWP_STORE_URL".into(), "NWP_RAW_DIR".into()])
        );
    }

    #[test]
    fn test_overrides() {
        let config = ConsumerConfig::from_lookup(lookup(&[
            ("NWP_PROVIDER", "ceda-ukv"),
            ("NWP_STORE_URL", "/data/store"),
            ("NWP_RAW_DIR", "/data/raw"),
            ("NWP_CONCURRENCY", "8"),
            ("NWP_COMPRESSION", "blosc_lz4"),
            ("NWP_SCHEMA_VERSION", "2"),
            ("NWP_CYCLE_HOURS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.raw_dir, Some(PathBuf::from("/data/raw")));
        assert_eq!(config.store.compression, Compression::BloscLz4);
        assert_eq!(config.store.dataset_key(), "ceda-ukv/v2");
        assert_eq!(config.cycle_hours, 3);
    }

    #[test]
    fn test_invalid_values() {
        let err = ConsumerConfig::from_lookup(lookup(&[
            ("NWP_PROVIDER", "noaa-gfs"),
            ("NWP_STORE_URL", "memory://"),
            ("NWP_CONCURRENCY", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "NWP_CONCURRENCY"));

        let err = ConsumerConfig::from_lookup(lookup(&[
            ("NWP_PROVIDER", "noaa-gfs"),
            ("NWP_STORE_URL", "memory://"),
            ("NWP_CYCLE_HOURS", "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
