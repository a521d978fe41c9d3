//! Raw inputs: file descriptors and decoded records.

use serde::{Deserialize, Serialize};

use crate::grid::GridCoordinate;
use crate::time::{InitTime, StepOffset};
use crate::variable::VariableKey;

/// A raw provider file belonging to one init time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Provider identifier, e.g. `noaa-gfs`
    pub provider: String,
    /// Init time the file belongs to
    pub init_time: InitTime,
    /// Provider-specific location (local path, object key or URL)
    pub path: String,
    /// Size in bytes, when the listing reports it
    pub size: Option<u64>,
}

impl FileDescriptor {
    pub fn new(provider: impl Into<String>, init_time: InitTime, path: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            init_time,
            path: path.into(),
            size: None,
        }
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Whether the file is gzip-wrapped, judged by its name.
    pub fn is_gzipped(&self) -> bool {
        self.path.ends_with(".gz")
    }
}

/// One variable decoded from raw input, already resolved to its canonical key.
///
/// Values are dense and indexed `[step, y, x]` (or `[step, values]` for
/// unstructured grids), with the steps in ascending order.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub init_time: InitTime,
    pub steps: Vec<StepOffset>,
    pub grid: GridCoordinate,
    pub variable: VariableKey,
    pub units: String,
    pub values: Vec<f32>,
}

impl RawRecord {
    /// Number of values the record must hold for its steps and grid.
    pub fn expected_len(&self) -> usize {
        self.steps.len() * self.grid.points()
    }

    /// Values of a single step, by position in `steps`.
    pub fn step_values(&self, index: usize) -> Option<&[f32]> {
        let points = self.grid.points();
        self.values.get(index * points..(index + 1) * points)
    }
}
