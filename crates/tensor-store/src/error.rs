//! Error types for the tensor store.

use nwp_common::{NwpError, VariableKey};
use thiserror::Error;

/// A dataset introduces variables the frozen schema does not have.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("schema drift in {dataset_key}: variables {variables:?} are not in the frozen schema")]
pub struct SchemaDriftError {
    pub dataset_key: String,
    pub variables: Vec<VariableKey>,
}

/// Errors that can occur reading or merging into the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Fatal for the whole store: the schema cannot absorb the dataset.
    #[error(transparent)]
    SchemaDrift(#[from] SchemaDriftError),

    /// The dataset grid differs from the frozen grid.
    #[error("grid mismatch: store has {expected}, dataset has {found}")]
    GridMismatch { expected: String, found: String },

    /// Backend I/O failure.
    #[error("storage error at {path}: {message}")]
    Backend {
        path: String,
        message: String,
        transient: bool,
    },

    /// Zarr encode/decode error.
    #[error("Zarr format error: {0}")]
    Zarr(String),

    /// Unreadable schema or manifest.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Invalid store configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid dataset: {0}")]
    InvalidDataset(#[from] NwpError),

    /// No slice for the requested init time.
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn zarr(msg: impl ToString) -> Self {
        Self::Zarr(msg.to_string())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify an object store failure at `path`.
    pub fn backend(path: &str, err: object_store::Error) -> Self {
        let transient = matches!(
            err,
            object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }
        );
        Self::Backend {
            path: path.to_string(),
            message: err.to_string(),
            transient,
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { transient: true, .. })
    }
}

/// Failures of [`merge`](crate::merge) are store errors.
pub type MergeError = StoreError;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = StoreError::backend(
            "a/b",
            object_store::Error::Generic {
                store: "S3",
                source: "connection reset".into(),
            },
        );
        assert!(transient.is_transient());

        let permanent = StoreError::backend(
            "a/b",
            object_store::Error::NotFound {
                path: "a/b".to_string(),
                source: "missing".into(),
            },
        );
        assert!(!permanent.is_transient());
        assert!(!StoreError::metadata("bad json").is_transient());
    }

    #[test]
    fn test_schema_drift_message() {
        let err = StoreError::from(SchemaDriftError {
            dataset_key: "noaa-gfs/v1".to_string(),
            variables: vec![VariableKey::new("snow_depth_gl").unwrap()],
        });
        assert!(err.to_string().contains("snow_depth_gl"));
        assert!(!err.is_transient());
    }
}
