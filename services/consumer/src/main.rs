//! NWP consumer.
//!
//! Consumes raw provider files into the consolidated forecast store:
//! - `consume` the latest or explicitly given init times
//! - `archive` a whole month
//! - `check` the configuration without touching data
//! - `info` about the catalog and the store

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use ingestion::{GribDecoder, ParameterCatalog};
use nwp_common::InitTime;
use tensor_store::{ObjectStoreBackend, StoreBackend, TensorStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nwp_consumer::sources::fetcher_for;
use nwp_consumer::{
    ConsumerConfig, InitTimeSelection, Orchestrator, OrchestratorConfig, RunSummary,
};

#[derive(Parser, Debug)]
#[command(name = "nwp-consumer")]
#[command(version, about = "Consolidates NWP provider files into a chunked forecast store")]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "NWP_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume recent or explicit init times
    Consume {
        /// Number of most recent cycles (default 1)
        #[arg(long, conflicts_with = "init_time")]
        latest: Option<u32>,

        /// Init time to consume, repeatable (e.g. 2024-01-15T12:00)
        #[arg(long = "init-time")]
        init_time: Vec<String>,

        /// Re-consume init times already in the store
        #[arg(long)]
        force: bool,
    },

    /// Backfill every cycle of a month
    Archive {
        #[arg(long)]
        year: i32,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,

        #[arg(long)]
        force: bool,
    },

    /// Validate configuration, catalog and store access
    Check,

    /// Print catalog parameters and store axes
    Info,
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

fn load_catalog(config: &ConsumerConfig) -> Result<Arc<ParameterCatalog>> {
    let catalog = match &config.catalog_dir {
        Some(dir) => ParameterCatalog::from_dir(dir)
            .with_context(|| format!("loading catalog from {}", dir.display()))?,
        None => ParameterCatalog::builtin().context("loading built-in catalog")?,
    };
    if !catalog.has_provider(&config.provider) {
        anyhow::bail!(
            "provider '{}' is not in the catalog (known: {})",
            config.provider,
            catalog.providers().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(Arc::new(catalog))
}

async fn open_store(config: &ConsumerConfig) -> Result<TensorStore> {
    let backend: Arc<dyn StoreBackend> = Arc::new(
        ObjectStoreBackend::from_url(&config.store_url)
            .with_context(|| format!("opening store backend {}", config.store_url))?,
    );
    TensorStore::open(backend, config.store.clone())
        .await
        .context("opening store")
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        let detail = match (&outcome.merge, outcome.skipped) {
            (_, true) => "already in store".to_string(),
            (Some(merge), false) => merge.to_string(),
            (None, false) => String::new(),
        };
        println!("{}  {:<28} {}", outcome.init_time, outcome.state.to_string(), detail);
    }
    println!(
        "{} succeeded, {} failed{}",
        summary.succeeded(),
        summary.failed(),
        summary
            .aborted
            .as_ref()
            .map(|reason| format!(", aborted: {}", reason))
            .unwrap_or_default()
    );
}

async fn consume(config: ConsumerConfig, selection: InitTimeSelection, force: bool) -> Result<i32> {
    let init_times = selection.resolve(Utc::now(), config.cycle_hours)?;
    let catalog = load_catalog(&config)?;
    let fetcher = fetcher_for(&config)?;
    let store = Arc::new(open_store(&config).await?);

    let retry = config.retry_policy();
    let orchestrator = Orchestrator::new(
        fetcher,
        Arc::new(GribDecoder::filtered(catalog.clone())),
        catalog,
        store.clone(),
        OrchestratorConfig {
            concurrency: config.concurrency,
            fetch_timeout: config.fetch_timeout,
            fetch_retry: retry,
            merge_retry: retry,
            force,
        },
    );

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, finishing in-flight merges");
            token.cancel();
        }
    });

    let summary = orchestrator.run(init_times).await;
    drop(orchestrator);
    print_summary(&summary);

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close().await?;
    }
    Ok(summary.exit_code())
}

async fn check(config: ConsumerConfig) -> Result<i32> {
    let catalog = load_catalog(&config)?;
    fetcher_for(&config)?;
    let store = open_store(&config).await?;

    println!("provider:   {}", config.provider);
    println!("parameters: {}", catalog.parameters_for(&config.provider).len());
    println!("store:      {} ({})", store.dataset_key(), store.backend().describe());
    println!("configuration OK");
    store.close().await?;
    Ok(0)
}

async fn show_info(config: ConsumerConfig) -> Result<i32> {
    let catalog = load_catalog(&config)?;

    println!(
        "{}: {}",
        config.provider,
        catalog.provider_description(&config.provider).unwrap_or_default()
    );
    for key in catalog.parameters_for(&config.provider) {
        let units = catalog.expected_units(key.as_str()).unwrap_or("?");
        println!("  {:<40} {}", key.as_str(), units);
    }

    let store = open_store(&config).await?;
    match store.schema().await {
        Some(schema) => {
            let time_axis = store.time_axis().await;
            let step_axis = store.step_axis().await;
            println!("store {} (created {})", store.dataset_key(), schema.created_at);
            println!("  grid:       {}", schema.grid);
            println!("  variables:  {}", schema.variables.len());
            println!(
                "  init times: {} ({} .. {})",
                time_axis.len(),
                time_axis.first().map(InitTime::to_string).unwrap_or_default(),
                time_axis.last().map(InitTime::to_string).unwrap_or_default()
            );
            println!(
                "  steps:      {} (max {})",
                step_axis.len(),
                step_axis.last().map(|s| s.to_string()).unwrap_or_default()
            );
        }
        None => println!("store {} is empty", store.dataset_key()),
    }
    store.close().await?;
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format)?;

    let config = ConsumerConfig::from_env()?;
    info!(
        provider = %config.provider,
        store_url = %config.store_url,
        dataset_key = %config.store.dataset_key(),
        "Loaded configuration"
    );

    let code = match cli.command {
        Command::Consume {
            latest,
            init_time,
            force,
        } => {
            let selection = if init_time.is_empty() {
                InitTimeSelection::Latest(latest.unwrap_or(1))
            } else {
                InitTimeSelection::Explicit(
                    init_time
                        .iter()
                        .map(|s| InitTime::parse(s))
                        .collect::<Result<Vec<_>, _>>()
                        .context("parsing --init-time")?,
                )
            };
            consume(config, selection, force).await?
        }
        Command::Archive { year, month, force } => {
            consume(config, InitTimeSelection::Month { year, month }, force).await?
        }
        Command::Check => check(config).await?,
        Command::Info => show_info(config).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
