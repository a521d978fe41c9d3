//! Weather data ingestion library.
//!
//! Turns raw provider files into canonical datasets:
//!
//! - [`ParameterCatalog`] maps provider parameter identities to canonical
//!   variable names and carries their units and physical limits
//! - [`Decoder`] is the port raw bytes go through; [`GribDecoder`] is the
//!   GRIB2 implementation (gzip-aware)
//! - [`DatasetBuilder`] folds the records of one init time into a single
//!   [`CanonicalDataset`](nwp_common::CanonicalDataset) on a shared step axis

pub mod builder;
pub mod catalog;
pub mod config;
pub mod decoder;
pub mod error;
mod grib2;
mod tables;

// Re-exports
pub use builder::{resolve_fields, BuildOutput, BuildReport, DatasetBuilder};
pub use catalog::{LimitWarning, ParameterCatalog, ParameterInfo, ParameterScan, Resolution};
pub use config::level_types;
pub use decoder::{DecodedField, Decoder};
pub use error::{
    BuildError, DecodeError, DuplicateVariableError, GridMismatchError, IngestionError,
    ResolutionError, Result,
};
pub use grib2::{decompress_gzip, GribDecoder};
