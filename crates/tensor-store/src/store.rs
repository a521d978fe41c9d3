//! The store handle: open, read, vacuum.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use nwp_common::{
    reindex_steps, CanonicalDataset, DataVariable, InitTime, StepOffset, MISSING_VALUE,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::backend::StoreBackend;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::layout::StorePaths;
use crate::schema::{FrozenSchema, Manifest, SliceEntry};
use crate::zarr_codec::{decode_variable, slice_shape, EncodedArray};

/// In-memory copy of the published metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub schema: Option<FrozenSchema>,
    pub manifest: Manifest,
}

/// Handle to one logical store (provider + schema version).
///
/// Open it once per run and pass it to [`merge`](crate::merge). The handle is
/// the only writer: publication is serialized by an internal lock, and the
/// in-memory metadata mirrors what was last published.
#[derive(Debug)]
pub struct TensorStore {
    backend: Arc<dyn StoreBackend>,
    config: StoreConfig,
    paths: StorePaths,
    state: Mutex<StoreState>,
    /// Generations being staged by in-flight merges
    staging: StdMutex<HashSet<String>>,
}

impl TensorStore {
    /// Open (or prepare to create) the store and roll back leftovers of
    /// interrupted merges.
    #[instrument(skip(backend, config), fields(store = %backend.describe(), dataset_key = %config.dataset_key()))]
    pub async fn open(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let paths = StorePaths::new(&config.provider, config.schema_version);

        let mut schema = match backend.get(&paths.schema()).await? {
            Some(data) => Some(FrozenSchema::from_json(&data)?),
            None => None,
        };
        let manifest = match backend.get(&paths.manifest()).await? {
            Some(data) => Manifest::from_json(&data)?,
            None => {
                // The first merge writes the schema before its manifest
                if schema.take().is_some() {
                    warn!("Schema without a manifest, treating the store as empty");
                }
                Manifest::default()
            }
        };

        match &schema {
            None if !manifest.slices.is_empty() => {
                return Err(StoreError::metadata(format!(
                    "{} has a manifest but no schema",
                    paths.root()
                )));
            }
            Some(schema) if schema.provider != config.provider => {
                return Err(StoreError::metadata(format!(
                    "{} belongs to provider {}",
                    paths.root(),
                    schema.provider
                )));
            }
            Some(schema)
                if schema.chunking != config.chunking
                    || schema.compression != config.compression =>
            {
                warn!(
                    frozen_chunking = ?schema.chunking,
                    frozen_compression = %schema.compression,
                    "Configured chunking or compression differs from the frozen schema; using the frozen values"
                );
            }
            _ => {}
        }

        let store = Self {
            backend,
            config,
            paths,
            state: Mutex::new(StoreState { schema, manifest }),
            staging: StdMutex::new(HashSet::new()),
        };

        let removed = store.vacuum().await?;
        let state = store.state.lock().await;
        info!(
            revision = state.manifest.revision,
            init_times = state.manifest.slices.len(),
            steps = state.manifest.steps.len(),
            vacuumed = removed,
            "Opened tensor store"
        );
        drop(state);

        Ok(store)
    }

    /// Release the handle.
    pub async fn close(self) -> Result<()> {
        let state = self.state.lock().await;
        info!(
            dataset_key = %self.paths.root(),
            revision = state.manifest.revision,
            init_times = state.manifest.slices.len(),
            "Closed tensor store"
        );
        Ok(())
    }

    pub fn dataset_key(&self) -> &str {
        self.paths.root()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub(crate) fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub async fn schema(&self) -> Option<FrozenSchema> {
        self.state.lock().await.schema.clone()
    }

    pub async fn manifest(&self) -> Manifest {
        self.state.lock().await.manifest.clone()
    }

    pub(crate) async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    pub(crate) fn begin_staging(&self, generation: &str) {
        self.staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(generation.to_string());
    }

    pub(crate) fn end_staging(&self, generation: &str) {
        self.staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(generation);
    }

    /// Published init times, ascending.
    pub async fn time_axis(&self) -> Vec<InitTime> {
        self.state.lock().await.manifest.time_axis()
    }

    /// Current step axis.
    pub async fn step_axis(&self) -> Vec<StepOffset> {
        self.state.lock().await.manifest.steps.clone()
    }

    pub async fn contains(&self, init_time: InitTime) -> bool {
        self.state.lock().await.manifest.entry(init_time).is_some()
    }

    /// Read one time slice on the current step axis.
    ///
    /// Every schema variable is present; variables the slice was written
    /// without, and steps added after it was written, read as missing.
    #[instrument(skip(self), fields(dataset_key = %self.paths.root()))]
    pub async fn read_slice(&self, init_time: InitTime) -> Result<CanonicalDataset> {
        let StoreState { schema, manifest } = self.snapshot().await;
        let schema = schema.ok_or_else(|| StoreError::NotFound(self.paths.root().to_string()))?;
        let entry = manifest
            .entry(init_time)
            .ok_or_else(|| StoreError::NotFound(format!("{} in {}", init_time, self.paths.root())))?;

        let spatial = schema.grid.shape();
        let points = schema.grid.points();
        let shape = slice_shape(entry.steps.len(), &spatial);

        let mut variables = BTreeMap::new();
        for (key, units) in &schema.variables {
            let values = if entry.variables.contains(key) {
                let prefix = self.paths.variable(init_time, &entry.generation, key);
                let encoded = self.fetch_array(&prefix).await?;
                let values = decode_variable(encoded, &shape)?;
                reindex_steps(&values, &entry.steps, &manifest.steps, points)?
            } else {
                vec![MISSING_VALUE; manifest.steps.len() * points]
            };
            variables.insert(key.clone(), DataVariable::new(units.clone(), values));
        }

        debug!(init_time = %init_time, generation = %entry.generation, "Read slice");

        Ok(CanonicalDataset::try_new(
            init_time,
            manifest.steps.clone(),
            schema.grid.clone(),
            variables,
        )?)
    }

    /// Digest over every object of the store, to verify a run wrote nothing.
    pub async fn content_digest(&self) -> Result<String> {
        let mut context = md5::Context::new();
        for path in self.backend.list(self.paths.root()).await? {
            let data = self.backend.get(&path).await?.unwrap_or_default();
            context.consume(path.as_bytes());
            context.consume([0u8]);
            context.consume(&data);
        }
        Ok(format!("{:x}", context.compute()))
    }

    /// Delete staged generations no manifest entry references.
    ///
    /// Returns the number of objects removed.
    #[instrument(skip(self), fields(dataset_key = %self.paths.root()))]
    pub async fn vacuum(&self) -> Result<usize> {
        let (referenced, staging) = {
            let state = self.state.lock().await;
            let staging = self
                .staging
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            (state.manifest.referenced(), staging)
        };

        let orphans: BTreeSet<(String, String)> = self
            .backend
            .list(&self.paths.slices())
            .await?
            .iter()
            .filter_map(|path| self.paths.parse_generation(path))
            .filter(|(_, generation)| !staging.contains(*generation))
            .map(|(init_key, generation)| (init_key.to_string(), generation.to_string()))
            .filter(|pair| !referenced.contains(pair))
            .collect();

        let mut removed = 0;
        for (init_key, generation) in &orphans {
            let prefix = format!("{}/{}/{}", self.paths.slices(), init_key, generation);
            removed += self.backend.delete_prefix(&prefix).await?;
            warn!(
                init_key = %init_key,
                generation = %generation,
                "Removed unpublished generation"
            );
        }

        Ok(removed)
    }

    /// Upload an encoded array under `prefix`, returning the bytes written.
    pub(crate) async fn upload(&self, prefix: &str, encoded: EncodedArray) -> Result<u64> {
        let bytes = encoded.bytes();
        for (key, data) in encoded.objects {
            self.backend.put(&format!("{}/{}", prefix, key), data).await?;
        }
        Ok(bytes)
    }

    async fn fetch_array(&self, prefix: &str) -> Result<EncodedArray> {
        let mut objects = Vec::new();
        for path in self.backend.list(prefix).await? {
            let Some(relative) = path
                .strip_prefix(prefix)
                .and_then(|p| p.strip_prefix('/'))
            else {
                continue;
            };
            if let Some(data) = self.backend.get(&path).await? {
                objects.push((relative.to_string(), data));
            }
        }
        if objects.is_empty() {
            return Err(StoreError::NotFound(prefix.to_string()));
        }
        Ok(EncodedArray { objects })
    }

    pub(crate) fn slice_entry(
        init_time: InitTime,
        generation: String,
        digest: String,
        dataset: &CanonicalDataset,
        bytes: u64,
    ) -> SliceEntry {
        SliceEntry {
            init_time,
            generation,
            digest,
            steps: dataset.steps().to_vec(),
            variables: dataset.variable_keys().cloned().collect(),
            bytes,
        }
    }
}
