//! The decoding port between raw provider bytes and catalog resolution.

use bytes::Bytes;
use nwp_common::{FileDescriptor, GridCoordinate, StepOffset};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// One provider field decoded from a raw file, not yet resolved.
///
/// `values` is dense and indexed `[step, spatial...]` with `steps` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedField {
    /// Provider parameter identifier, e.g. `0.0.0` or `unknown`
    pub raw_identifier: String,
    /// Level type code (GRIB2 code table 4.5)
    pub level_type: u8,
    pub level_value: f64,
    /// Units as reported by the file, if it carries them
    pub units: Option<String>,
    pub steps: Vec<StepOffset>,
    pub grid: GridCoordinate,
    pub values: Vec<f32>,
}

impl DecodedField {
    /// Number of values implied by the steps and grid.
    pub fn expected_len(&self) -> usize {
        self.steps.len() * self.grid.points()
    }
}

/// Turns the bytes of one raw file into decoded fields.
///
/// Implementations are called from blocking worker threads and must not
/// assume an async runtime.
pub trait Decoder: Send + Sync {
    fn decode(&self, file: &FileDescriptor, data: Bytes) -> Result<Vec<DecodedField>, DecodeError>;
}

impl<D: Decoder + ?Sized> Decoder for std::sync::Arc<D> {
    fn decode(&self, file: &FileDescriptor, data: Bytes) -> Result<Vec<DecodedField>, DecodeError> {
        (**self).decode(file, data)
    }
}
