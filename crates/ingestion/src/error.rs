//! Error types for the ingestion crate.

use nwp_common::{InitTime, NwpError, VariableKey};
use thiserror::Error;

/// A provider parameter identity with no catalog entry.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "no catalog entry for provider '{provider}' parameter '{raw_identifier}' \
     at level type {level_type} value {level_value}"
)]
pub struct ResolutionError {
    pub provider: String,
    pub raw_identifier: String,
    pub level_type: u8,
    pub level_value: f64,
}

/// A raw file that could not be decoded.
#[derive(Error, Debug, Clone)]
#[error("failed to decode {provider} file: {reason}")]
pub struct DecodeError {
    pub provider: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Two records of one init time resolved to the same variable.
///
/// Not fatal: the first record is kept and the duplicate is reported.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("duplicate variable {variable} for init time {init_time}; keeping the first record")]
pub struct DuplicateVariableError {
    pub init_time: InitTime,
    pub variable: VariableKey,
}

/// A variable whose grid differs from the rest of its init time.
#[derive(Error, Debug, Clone)]
#[error("grid mismatch for {variable} at {init_time}: expected {expected}, found {found}")]
pub struct GridMismatchError {
    pub init_time: InitTime,
    pub variable: VariableKey,
    pub expected: String,
    pub found: String,
}

/// Fatal problems building the dataset of one init time.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no records to build init time {0}")]
    Empty(InitTime),

    #[error("record for {variable} belongs to {found}, not {expected}")]
    InitTimeMismatch {
        expected: InitTime,
        found: InitTime,
        variable: VariableKey,
    },

    #[error("malformed record for {variable}: {reason}")]
    MalformedRecord { variable: VariableKey, reason: String },

    #[error(transparent)]
    GridMismatch(#[from] GridMismatchError),

    #[error("invalid dataset: {0}")]
    InvalidDataset(#[from] NwpError),
}

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
