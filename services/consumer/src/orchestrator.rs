//! The per-init-time consumption state machine.
//!
//! ```text
//! Pending -> Fetching -> Building -> Merging -> Complete
//!               |           |           |
//!               +-----------+-----------+--> Failed(reason)
//! ```
//!
//! Fetching and building of independent init times run concurrently; merges
//! go through the store one at a time, in the order builds finish.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use ingestion::{resolve_fields, BuildOutput, DatasetBuilder, Decoder, ParameterCatalog};
use nwp_common::{FileDescriptor, InitTime};
use serde::Serialize;
use tensor_store::{merge, MergeOutcome, StoreError, TensorStore};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::sources::Fetcher;

/// Why an init time failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider has no files for the init time
    NoData,
    Fetch(String),
    Decode(String),
    /// A decoded field has no catalog entry
    Resolution(String),
    Build(String),
    Merge(String),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no data"),
            Self::Fetch(msg) => write!(f, "fetch: {}", msg),
            Self::Decode(msg) => write!(f, "decode: {}", msg),
            Self::Resolution(msg) => write!(f, "resolution: {}", msg),
            Self::Build(msg) => write!(f, "build: {}", msg),
            Self::Merge(msg) => write!(f, "merge: {}", msg),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<FetchError> for FailureReason {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e.to_string())
    }
}

/// Lifecycle state of one init time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitTimeState {
    Pending,
    Fetching,
    Building,
    Merging,
    Complete,
    Failed(FailureReason),
}

impl InitTimeState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Building => "building",
            Self::Merging => "merging",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

impl fmt::Display for InitTimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

fn transition(init_time: InitTime, from: &InitTimeState, to: &InitTimeState) {
    match to {
        InitTimeState::Failed(reason) => {
            warn!(init_time = %init_time, from = from.name(), reason = %reason, "Init time failed")
        }
        _ => info!(init_time = %init_time, from = from.name(), to = to.name(), "State transition"),
    }
    if to.is_terminal() {
        metrics::counter!("nwp_init_times_total", "state" => to.name()).increment(1);
    }
}

/// Final record of one init time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitTimeOutcome {
    pub init_time: InitTime,
    pub state: InitTimeState,
    /// What the merge did; `None` if no merge happened
    pub merge: Option<MergeOutcome>,
    /// Skipped because the store already held it
    pub skipped: bool,
    pub duplicates: usize,
    pub limit_warnings: usize,
}

impl InitTimeOutcome {
    fn new(init_time: InitTime) -> Self {
        Self {
            init_time,
            state: InitTimeState::Pending,
            merge: None,
            skipped: false,
            duplicates: 0,
            limit_warnings: 0,
        }
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match &self.state {
            InitTimeState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Result of a run over a sequence of init times.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<InitTimeOutcome>,
    /// Set when a schema drift stopped the run
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == InitTimeState::Complete)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.reason().is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.outcomes.iter().all(|o| o.state == InitTimeState::Complete)
    }

    /// Process exit code: 0 on full success, 2 if aborted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.aborted.is_some() {
            2
        } else if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Run settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Init times prepared at once, and the download permit count
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    pub merge_retry: RetryPolicy,
    /// Re-consume init times the store already holds
    pub force: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout: Duration::from_secs(300),
            fetch_retry: RetryPolicy::default(),
            merge_retry: RetryPolicy::default(),
            force: false,
        }
    }
}

/// Everything an init time needs before the merge.
struct Preparation {
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    catalog: Arc<ParameterCatalog>,
    downloads: Arc<Semaphore>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

/// Drives init times from the provider into the store.
pub struct Orchestrator {
    preparation: Arc<Preparation>,
    store: Arc<TensorStore>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        catalog: Arc<ParameterCatalog>,
        store: Arc<TensorStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let downloads = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            preparation: Arc::new(Preparation {
                fetcher,
                decoder,
                catalog,
                downloads,
                config,
                cancel: CancellationToken::new(),
            }),
            store,
        }
    }

    /// Token that stops the run: no new work starts, in-flight merges finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.preparation.cancel.clone()
    }

    /// Consume `init_times`.
    #[instrument(skip(self, init_times), fields(provider = %self.preparation.fetcher.provider(), count = init_times.len()))]
    pub async fn run(&self, mut init_times: Vec<InitTime>) -> RunSummary {
        init_times.sort();
        init_times.dedup();

        let mut outcomes: BTreeMap<InitTime, InitTimeOutcome> = init_times
            .iter()
            .map(|t| (*t, InitTimeOutcome::new(*t)))
            .collect();
        let mut aborted = None;

        let mut queue = Vec::new();
        for init_time in init_times {
            if !self.preparation.config.force && self.store.contains(init_time).await {
                debug!(init_time = %init_time, "Already in store, skipping");
                if let Some(outcome) = outcomes.get_mut(&init_time) {
                    outcome.state = InitTimeState::Complete;
                    outcome.skipped = true;
                }
                continue;
            }
            queue.push(init_time);
        }

        info!(queued = queue.len(), skipped = outcomes.len() - queue.len(), "Starting run");

        let cancel = self.preparation.cancel.clone();
        let concurrency = self.preparation.config.concurrency.max(1);
        let mut prepared = stream::iter(queue)
            .map(|init_time| {
                let preparation = self.preparation.clone();
                async move {
                    let handle = tokio::spawn(prepare(preparation, init_time));
                    let result = handle.await.unwrap_or_else(|e| {
                        Err(FailureReason::Build(format!("worker task failed: {}", e)))
                    });
                    (init_time, result)
                }
            })
            .buffer_unordered(concurrency);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = prepared.next() => next,
            };
            let Some((init_time, result)) = next else {
                break;
            };
            let Some(outcome) = outcomes.get_mut(&init_time) else {
                continue;
            };

            let output = match result {
                Ok(output) => output,
                Err(reason) => {
                    let from = match reason {
                        FailureReason::NoData | FailureReason::Fetch(_) => InitTimeState::Fetching,
                        _ => InitTimeState::Building,
                    };
                    let failed = InitTimeState::Failed(reason);
                    transition(init_time, &from, &failed);
                    outcome.state = failed;
                    continue;
                }
            };
            outcome.duplicates = output.report.duplicates.len();
            outcome.limit_warnings = output.report.limit_warnings.len();

            transition(init_time, &InitTimeState::Building, &InitTimeState::Merging);
            outcome.state = InitTimeState::Merging;

            let store = &self.store;
            let dataset = &output.dataset;
            let merged = self
                .preparation
                .config
                .merge_retry
                .run("merge", || merge(store, dataset), StoreError::is_transient)
                .await;

            match merged {
                Ok(result) => {
                    transition(init_time, &InitTimeState::Merging, &InitTimeState::Complete);
                    outcome.state = InitTimeState::Complete;
                    outcome.merge = Some(result.outcome);
                }
                Err(StoreError::SchemaDrift(drift)) => {
                    error!(init_time = %init_time, error = %drift, "Schema drift, aborting run");
                    let failed = InitTimeState::Failed(FailureReason::Merge(drift.to_string()));
                    transition(init_time, &InitTimeState::Merging, &failed);
                    outcome.state = failed;
                    aborted = Some(drift.to_string());
                    cancel.cancel();
                    break;
                }
                Err(e) => {
                    let failed = InitTimeState::Failed(FailureReason::Merge(e.to_string()));
                    transition(init_time, &InitTimeState::Merging, &failed);
                    outcome.state = failed;
                }
            }
        }

        if aborted.is_none() && cancel.is_cancelled() {
            for outcome in outcomes.values_mut().filter(|o| !o.state.is_terminal()) {
                let failed = InitTimeState::Failed(FailureReason::Cancelled);
                transition(outcome.init_time, &outcome.state, &failed);
                outcome.state = failed;
            }
        }

        let summary = RunSummary {
            outcomes: outcomes.into_values().collect(),
            aborted,
        };
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            aborted = summary.aborted.is_some(),
            "Run finished"
        );
        summary
    }
}

/// Fetch, decode, resolve and build one init time.
#[instrument(skip(preparation), fields(init_time = %init_time))]
async fn prepare(preparation: Arc<Preparation>, init_time: InitTime) -> Result<BuildOutput, FailureReason> {
    let cancel = preparation.cancel.clone();
    tokio::select! {
        _ = cancel.cancelled() => Err(FailureReason::Cancelled),
        result = prepare_inner(&preparation, init_time) => result,
    }
}

async fn prepare_inner(preparation: &Preparation, init_time: InitTime) -> Result<BuildOutput, FailureReason> {
    transition(init_time, &InitTimeState::Pending, &InitTimeState::Fetching);
    let config = &preparation.config;
    let fetcher = &preparation.fetcher;

    let files = config
        .fetch_retry
        .run(
            "list",
            || fetcher.list_raw_files(init_time),
            FetchError::is_transient,
        )
        .await?;
    if files.is_empty() {
        return Err(FailureReason::NoData);
    }

    let downloads: Vec<Result<(FileDescriptor, Bytes), FetchError>> = stream::iter(files)
        .map(|file| download(preparation, file))
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;
    let downloads = downloads.into_iter().collect::<Result<Vec<_>, _>>()?;

    transition(init_time, &InitTimeState::Fetching, &InitTimeState::Building);

    let decoder = preparation.decoder.clone();
    let catalog = preparation.catalog.clone();
    tokio::task::spawn_blocking(move || build(init_time, downloads, decoder.as_ref(), &catalog))
        .await
        .map_err(|e| FailureReason::Build(format!("worker task failed: {}", e)))?
}

/// Download one file under a permit, with timeout and retries.
async fn download(
    preparation: &Preparation,
    file: FileDescriptor,
) -> Result<(FileDescriptor, Bytes), FetchError> {
    let config = &preparation.config;
    let _permit = preparation
        .downloads
        .acquire()
        .await
        .map_err(|e| FetchError::permanent(&file.path, e))?;

    let data = config
        .fetch_retry
        .run(
            "download",
            || async {
                match tokio::time::timeout(config.fetch_timeout, preparation.fetcher.download(&file))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        path: file.path.clone(),
                        secs: config.fetch_timeout.as_secs(),
                    }),
                }
            },
            FetchError::is_transient,
        )
        .await?;

    metrics::counter!("nwp_files_downloaded_total").increment(1);
    metrics::counter!("nwp_bytes_downloaded_total").increment(data.len() as u64);
    debug!(path = %file.path, size = data.len(), "Downloaded");
    Ok((file, data))
}

/// Decode every file and build the dataset. Runs on a blocking thread.
fn build(
    init_time: InitTime,
    downloads: Vec<(FileDescriptor, Bytes)>,
    decoder: &dyn Decoder,
    catalog: &ParameterCatalog,
) -> Result<BuildOutput, FailureReason> {
    let mut records = Vec::new();
    for (file, data) in downloads {
        let fields = decoder
            .decode(&file, data)
            .map_err(|e| FailureReason::Decode(format!("{}: {}", file.path, e)))?;
        let resolved = resolve_fields(catalog, &file, fields)
            .map_err(|e| FailureReason::Resolution(e.to_string()))?;
        records.extend(resolved);
    }

    let output = DatasetBuilder::new(init_time)
        .with_limits(catalog)
        .build(records)
        .map_err(|e| FailureReason::Build(e.to_string()))?;

    for duplicate in &output.report.duplicates {
        warn!(error = %duplicate, "Duplicate variable");
    }
    Ok(output)
}
