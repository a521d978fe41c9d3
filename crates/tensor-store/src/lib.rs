//! Append-only chunked forecast store.
//!
//! One store holds one provider's canonical datasets on a shared grid, as a
//! Zarr V3 hierarchy per init time:
//!
//! - the first [`merge`] freezes a [`FrozenSchema`] (grid, variables, codec)
//! - every merge stages a new generation and publishes it by replacing the
//!   [`Manifest`], so readers never see a partial write
//! - the step axis is the union of every merged step axis; slices written
//!   with fewer steps read as missing on the extra ones
//!
//! Storage goes through [`StoreBackend`], with an `object_store`
//! implementation for memory, local disk and S3.

pub mod backend;
pub mod config;
pub mod error;
pub mod layout;
pub mod merge;
pub mod schema;
pub mod store;
pub mod zarr_codec;

// Re-exports
pub use backend::{ObjectStoreBackend, StoreBackend};
pub use config::{ChunkPolicy, Compression, StoreConfig, DEFAULT_SCHEMA_VERSION};
pub use error::{MergeError, Result, SchemaDriftError, StoreError};
pub use layout::StorePaths;
pub use merge::{merge, MergeOutcome, MergeResult};
pub use schema::{FrozenSchema, Manifest, SliceEntry};
pub use store::TensorStore;
