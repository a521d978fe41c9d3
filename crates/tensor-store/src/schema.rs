//! Persisted store metadata: the frozen schema and the manifest.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use nwp_common::{CanonicalDataset, GridCoordinate, InitTime, StepOffset, VariableKey};
use serde::{Deserialize, Serialize};

use crate::config::{ChunkPolicy, Compression, StoreConfig};
use crate::error::{Result, SchemaDriftError, StoreError};

/// What a store holds, fixed by the first merge.
///
/// Only the step axis may grow afterwards, and that growth is tracked in the
/// [`Manifest`]; `creation_steps` records the axis the store started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenSchema {
    pub dataset_key: String,
    pub provider: String,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub creation_steps: Vec<StepOffset>,
    pub grid: GridCoordinate,
    /// Variable set with units
    pub variables: BTreeMap<VariableKey, String>,
    pub chunking: ChunkPolicy,
    pub compression: Compression,
    pub compression_level: u8,
}

impl FrozenSchema {
    /// Freeze the schema of a new store from its first dataset.
    pub fn from_dataset(config: &StoreConfig, dataset: &CanonicalDataset) -> Self {
        Self {
            dataset_key: config.dataset_key(),
            provider: config.provider.clone(),
            schema_version: config.schema_version,
            created_at: Utc::now(),
            creation_steps: dataset.steps().to_vec(),
            grid: dataset.grid().clone(),
            variables: dataset
                .variables()
                .map(|(k, v)| (k.clone(), v.units.clone()))
                .collect(),
            chunking: config.chunking,
            compression: config.compression,
            compression_level: config.compression_level,
        }
    }

    /// Check a dataset can be merged without changing the schema.
    ///
    /// Variables missing from the dataset are allowed; new ones are drift.
    pub fn validate(&self, dataset: &CanonicalDataset) -> Result<()> {
        let unknown: Vec<VariableKey> = dataset
            .variable_keys()
            .filter(|k| !self.variables.contains_key(*k))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SchemaDriftError {
                dataset_key: self.dataset_key.clone(),
                variables: unknown,
            }
            .into());
        }

        if !dataset.grid().is_compatible(&self.grid) {
            return Err(StoreError::GridMismatch {
                expected: self.grid.to_string(),
                found: dataset.grid().to_string(),
            });
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::metadata(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| StoreError::metadata(format!("invalid schema.json: {}", e)))
    }
}

/// One published time slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceEntry {
    pub init_time: InitTime,
    /// Prefix component the slice's arrays live under
    pub generation: String,
    /// Content digest of the merged dataset
    pub digest: String,
    /// Steps the slice was written with
    pub steps: Vec<StepOffset>,
    /// Variables written; other schema variables read as missing
    pub variables: Vec<VariableKey>,
    /// Bytes staged for the slice
    pub bytes: u64,
}

/// The published state of a store. Replacing it is the commit point of a
/// merge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub revision: u64,
    pub published_at: Option<DateTime<Utc>>,
    /// Current step axis: union of every merged step axis
    pub steps: Vec<StepOffset>,
    /// Slices in ascending init time order
    pub slices: Vec<SliceEntry>,
}

impl Manifest {
    pub fn time_axis(&self) -> Vec<InitTime> {
        self.slices.iter().map(|s| s.init_time).collect()
    }

    pub fn entry(&self, init_time: InitTime) -> Option<&SliceEntry> {
        self.slices
            .binary_search_by_key(&init_time, |s| s.init_time)
            .ok()
            .map(|i| &self.slices[i])
    }

    /// Steps of `steps` not yet on the axis.
    pub fn new_steps(&self, steps: &[StepOffset]) -> Vec<StepOffset> {
        steps
            .iter()
            .filter(|s| self.steps.binary_search(s).is_err())
            .copied()
            .collect()
    }

    /// The next revision with `entry` inserted (or replacing the slice of
    /// the same init time) and the step axis extended. Returns the replaced
    /// entry, if any.
    pub fn with_slice(&self, entry: SliceEntry) -> (Manifest, Option<SliceEntry>) {
        let mut next = self.clone();
        next.revision += 1;
        next.published_at = Some(Utc::now());
        next.steps = self
            .steps
            .iter()
            .chain(entry.steps.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let replaced = match next
            .slices
            .binary_search_by_key(&entry.init_time, |s| s.init_time)
        {
            Ok(i) => Some(std::mem::replace(&mut next.slices[i], entry)),
            Err(i) => {
                next.slices.insert(i, entry);
                None
            }
        };
        (next, replaced)
    }

    /// Generations referenced by the manifest, as (init key, generation).
    pub fn referenced(&self) -> BTreeSet<(String, String)> {
        self.slices
            .iter()
            .map(|s| (s.init_time.key(), s.generation.clone()))
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::metadata(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| StoreError::metadata(format!("invalid manifest.json: {}", e)))?;
        if manifest
            .slices
            .windows(2)
            .any(|w| w[0].init_time >= w[1].init_time)
        {
            return Err(StoreError::metadata(
                "manifest time axis is not strictly increasing",
            ));
        }
        Ok(manifest)
    }
}
