//! NWP consumer service library.
//!
//! Wires the pieces of a run together: configuration, raw file
//! [`Fetcher`]s, retry policy, init time selection and the
//! [`Orchestrator`] that moves each init time from the provider into the
//! store.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod selection;
pub mod sources;

// Re-exports
pub use config::ConsumerConfig;
pub use error::{ConfigError, ConsumerError, FetchError, SelectionError};
pub use orchestrator::{
    FailureReason, InitTimeOutcome, InitTimeState, Orchestrator, OrchestratorConfig, RunSummary,
};
pub use retry::RetryPolicy;
pub use selection::InitTimeSelection;
pub use sources::{Fetcher, LocalDirFetcher, NoaaGfsFetcher};
