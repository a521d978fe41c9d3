//! Configuration for the tensor store.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Schema version new stores are created with.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Chunk shape of slice arrays, frozen when the store is created.
///
/// The init-time dimension always has chunk size 1, so every merge writes
/// whole chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Steps per chunk
    pub step: usize,
    /// Points per chunk along each spatial dimension
    pub spatial: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            step: 1,
            spatial: 512,
        }
    }
}

impl ChunkPolicy {
    /// Chunk shape for an array of `[1, steps, spatial...]`, capped at the
    /// array extent.
    pub fn chunk_shape(&self, shape: &[usize]) -> Vec<u64> {
        shape
            .iter()
            .enumerate()
            .map(|(dim, &extent)| {
                let size = match dim {
                    0 => 1,
                    1 => self.step,
                    _ => self.spatial,
                };
                size.min(extent).max(1) as u64
            })
            .collect()
    }
}

/// Compression codec for slice arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl Compression {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "blosc_lz4" | "lz4" => Ok(Self::BloscLz4),
            "blosc_zstd" | "zstd" => Ok(Self::BloscZstd),
            other => Err(StoreError::config(format!(
                "unknown compression '{}' (expected none, blosc_lz4 or blosc_zstd)",
                other
            ))),
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one logical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Provider the store consolidates
    pub provider: String,
    pub schema_version: u32,
    pub chunking: ChunkPolicy,
    pub compression: Compression,
    /// Compression level (1-9).
    pub compression_level: u8,
}

impl StoreConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            chunking: ChunkPolicy::default(),
            compression: Compression::default(),
            compression_level: 1,
        }
    }

    /// Build from a variable lookup, e.g. `std::env::var`.
    ///
    /// Reads `NWP_SPATIAL_CHUNK`, `NWP_STEP_CHUNK`, `NWP_COMPRESSION` and
    /// `NWP_COMPRESSION_LEVEL`; absent variables keep their defaults.
    pub fn from_lookup<F>(provider: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(provider);

        if let Some(val) = lookup("NWP_SPATIAL_CHUNK") {
            config.chunking.spatial = parse_number("NWP_SPATIAL_CHUNK", &val)?;
        }

        if let Some(val) = lookup("NWP_STEP_CHUNK") {
            config.chunking.step = parse_number("NWP_STEP_CHUNK", &val)?;
        }

        if let Some(val) = lookup("NWP_COMPRESSION") {
            config.compression = Compression::parse(&val)?;
        }

        if let Some(val) = lookup("NWP_COMPRESSION_LEVEL") {
            config.compression_level = parse_number("NWP_COMPRESSION_LEVEL", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env(provider: &str) -> Result<Self> {
        Self::from_lookup(provider, |key| std::env::var(key).ok())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() || self.provider.contains('/') {
            return Err(StoreError::config(format!(
                "invalid provider name '{}'",
                self.provider
            )));
        }

        if self.chunking.step == 0 || self.chunking.spatial == 0 {
            return Err(StoreError::config("chunk sizes must be > 0"));
        }

        if self.compression != Compression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err(StoreError::config("compression_level must be 1-9"));
        }

        Ok(())
    }

    /// Logical dataset key, `<provider>/v<schema_version>`.
    pub fn dataset_key(&self) -> String {
        format!("{}/v{}", self.provider, self.schema_version)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| StoreError::config(format!("{} must be a number, got '{}'", name, val)))
}
