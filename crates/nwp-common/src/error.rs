//! Error types for the canonical data model.

use thiserror::Error;

/// Result type alias using NwpError.
pub type NwpResult<T> = Result<T, NwpError>;

/// Errors raised while constructing or validating model types.
#[derive(Debug, Error)]
pub enum NwpError {
    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    #[error("Invalid step offset: {0}")]
    InvalidStep(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid variable name: {0}")]
    InvalidVariable(String),
}

impl NwpError {
    pub fn invalid_dataset(msg: impl Into<String>) -> Self {
        Self::InvalidDataset(msg.into())
    }

    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }
}
