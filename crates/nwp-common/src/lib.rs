//! Common types shared across the NWP consumer crates.
//!
//! Every provider is translated into the same in-memory model before it
//! reaches the store: an [`InitTime`] partition, an ordered set of
//! [`StepOffset`]s, one [`GridCoordinate`] and a map of [`VariableKey`] to
//! dense `f32` buffers.

pub mod dataset;
pub mod error;
pub mod grid;
pub mod record;
pub mod time;
pub mod variable;

pub use dataset::{
    is_missing, reindex_steps, CanonicalDataset, DataVariable, MISSING_VALUE, STEP_DIMENSION,
    TIME_DIMENSION,
};
pub use error::{NwpError, NwpResult};
pub use grid::{quantize, Axis, GridCoordinate, COORDINATE_DECIMALS};
pub use record::{FileDescriptor, RawRecord};
pub use time::{InitTime, StepOffset};
pub use variable::VariableKey;
