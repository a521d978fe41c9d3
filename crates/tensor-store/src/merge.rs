//! Transactional merge of one canonical dataset into the store.
//!
//! A merge stages every variable under a fresh generation directory, then
//! publishes by replacing `manifest.json`. Readers resolve slices through
//! the manifest only, so they observe the store either before or after a
//! merge. A merge interrupted at any point leaves at most an unreferenced
//! generation, which [`TensorStore::vacuum`] removes.

use nwp_common::{CanonicalDataset, InitTime, StepOffset};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{FrozenSchema, SliceEntry};
use crate::store::{StoreState, TensorStore};
use crate::zarr_codec::encode_variable;

/// How a merge changed the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// First slice: the schema was frozen by this merge
    Created,
    /// New init time added to the time axis
    Appended,
    /// Existing init time replaced with different content
    Overwritten,
    /// Identical content already published; nothing was written
    Unchanged,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Appended => "appended",
            Self::Overwritten => "overwritten",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether the store was modified.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub init_time: InitTime,
    pub outcome: MergeOutcome,
    /// Steps this merge added to the step axis
    pub steps_extended: Vec<StepOffset>,
    pub bytes_staged: u64,
    /// Manifest revision after the merge
    pub revision: u64,
}

/// Keeps a generation out of [`TensorStore::vacuum`] while it is staged.
struct StagingGuard<'a> {
    store: &'a TensorStore,
    generation: String,
}

impl<'a> StagingGuard<'a> {
    fn new(store: &'a TensorStore) -> Self {
        let generation = Uuid::new_v4().simple().to_string();
        store.begin_staging(&generation);
        Self { store, generation }
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        self.store.end_staging(&self.generation);
    }
}

enum Published {
    Committed {
        outcome: MergeOutcome,
        steps_extended: Vec<StepOffset>,
        replaced: Option<SliceEntry>,
        revision: u64,
    },
    /// A concurrent merge published the same content first
    AlreadyPresent { revision: u64 },
}

/// Merge `dataset` into `store`.
///
/// The first merge freezes the schema. Later merges must match its grid and
/// may not add variables; they may add steps, which extends the step axis for
/// every slice. Merging content that is already published is a no-op.
#[instrument(skip(store, dataset), fields(dataset_key = %store.dataset_key(), init_time = %dataset.init_time()))]
pub async fn merge(store: &TensorStore, dataset: &CanonicalDataset) -> Result<MergeResult> {
    let init_time = dataset.init_time();
    let digest = dataset.content_digest();

    let StoreState { schema, manifest } = store.snapshot().await;
    let schema = match schema {
        Some(schema) => {
            schema.validate(dataset)?;
            schema
        }
        None => FrozenSchema::from_dataset(store.config(), dataset),
    };

    if manifest.entry(init_time).map(|e| e.digest.as_str()) == Some(digest.as_str()) {
        return Ok(unchanged(init_time, manifest.revision));
    }

    let guard = StagingGuard::new(store);
    let bytes_staged = match stage(store, &schema, dataset, &guard.generation).await {
        Ok(bytes) => bytes,
        Err(e) => {
            discard(store, init_time, &guard.generation).await;
            return Err(e);
        }
    };

    let entry = TensorStore::slice_entry(
        init_time,
        guard.generation.clone(),
        digest,
        dataset,
        bytes_staged,
    );

    let mut state = store.lock_state().await;
    let published = match publish(store, &mut state, schema, dataset, entry).await {
        Ok(published) => published,
        Err(e) => {
            drop(state);
            discard(store, init_time, &guard.generation).await;
            return Err(e);
        }
    };
    // Leave the staging set while the new manifest is already visible
    let entry_generation = guard.generation.clone();
    drop(guard);
    drop(state);

    let (outcome, steps_extended, replaced, revision) = match published {
        Published::Committed {
            outcome,
            steps_extended,
            replaced,
            revision,
        } => (outcome, steps_extended, replaced, revision),
        Published::AlreadyPresent { revision } => {
            discard(store, init_time, &entry_generation).await;
            return Ok(unchanged(init_time, revision));
        }
    };

    if let Some(old) = replaced {
        let prefix = store.paths().generation(init_time, &old.generation);
        if let Err(e) = store.backend().delete_prefix(&prefix).await {
            // Vacuum picks it up on the next open
            warn!(generation = %old.generation, error = %e, "Failed to delete replaced generation");
        }
    }

    metrics::counter!("nwp_merges_total", "outcome" => outcome.as_str()).increment(1);
    metrics::counter!("nwp_merge_bytes_staged_total").increment(bytes_staged);
    if !steps_extended.is_empty() {
        metrics::counter!("nwp_step_axis_extensions_total").increment(1);
    }

    info!(
        outcome = %outcome,
        revision = revision,
        bytes_staged = bytes_staged,
        steps_extended = steps_extended.len(),
        "Merged dataset"
    );

    Ok(MergeResult {
        init_time,
        outcome,
        steps_extended,
        bytes_staged,
        revision,
    })
}

fn unchanged(init_time: InitTime, revision: u64) -> MergeResult {
    metrics::counter!("nwp_merges_total", "outcome" => MergeOutcome::Unchanged.as_str())
        .increment(1);
    info!(revision = revision, "Slice already published with identical content");
    MergeResult {
        init_time,
        outcome: MergeOutcome::Unchanged,
        steps_extended: Vec::new(),
        bytes_staged: 0,
        revision,
    }
}

/// Encode and upload every variable under the staging generation.
async fn stage(
    store: &TensorStore,
    schema: &FrozenSchema,
    dataset: &CanonicalDataset,
    generation: &str,
) -> Result<u64> {
    let mut bytes = 0;
    for key in dataset.variable_keys() {
        let encoded = encode_variable(schema, dataset, key)?;
        let prefix = store
            .paths()
            .variable(dataset.init_time(), generation, key);
        bytes += store.upload(&prefix, encoded).await?;
        debug!(variable = %key, generation = %generation, "Staged variable");
    }
    Ok(bytes)
}

/// Re-check against the current state and replace the manifest.
async fn publish(
    store: &TensorStore,
    state: &mut StoreState,
    candidate: FrozenSchema,
    dataset: &CanonicalDataset,
    entry: SliceEntry,
) -> Result<Published> {
    // Another merge may have published since the snapshot
    let created = match &state.schema {
        Some(current) => {
            current.validate(dataset)?;
            false
        }
        None => {
            store
                .backend()
                .put(&store.paths().schema(), candidate.to_json()?.into())
                .await?;
            true
        }
    };

    if let Some(existing) = state.manifest.entry(entry.init_time) {
        if existing.digest == entry.digest {
            return Ok(Published::AlreadyPresent {
                revision: state.manifest.revision,
            });
        }
    }

    let steps_extended = if created {
        Vec::new()
    } else {
        state.manifest.new_steps(&entry.steps)
    };
    let (next, replaced) = state.manifest.with_slice(entry);
    store
        .backend()
        .put(&store.paths().manifest(), next.to_json()?.into())
        .await?;

    if created {
        state.schema = Some(candidate);
    }
    let revision = next.revision;
    state.manifest = next;

    let outcome = if created {
        MergeOutcome::Created
    } else if replaced.is_some() {
        MergeOutcome::Overwritten
    } else {
        MergeOutcome::Appended
    };

    Ok(Published::Committed {
        outcome,
        steps_extended,
        replaced,
        revision,
    })
}

/// Best-effort removal of a staged generation that will not be published.
async fn discard(store: &TensorStore, init_time: InitTime, generation: &str) {
    let prefix = store.paths().generation(init_time, generation);
    match store.backend().delete_prefix(&prefix).await {
        Ok(removed) => debug!(generation = %generation, removed = removed, "Discarded staged generation"),
        Err(e) => warn!(generation = %generation, error = %e, "Failed to discard staged generation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(MergeOutcome::Created.as_str(), "created");
        assert_eq!(MergeOutcome::Overwritten.to_string(), "overwritten");
        assert!(MergeOutcome::Appended.is_write());
        assert!(!MergeOutcome::Unchanged.is_write());
        assert_eq!(
            serde_json::to_string(&MergeOutcome::Unchanged).unwrap(),
            "\"unchanged\""
        );
    }
}
