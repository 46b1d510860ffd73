//! cauldron-ops - cauldron monitoring, reconciliation and dispatch planning
//!
//! Loads a snapshot from a data directory (`entities.json`, `samples.json`,
//! `tickets.json`, `edges.json`) and runs one operation, printing JSON.
//!
//! # Usage
//!
//! ```bash
//! # Generate a synthetic snapshot
//! generate-snapshot --out data --entities 8 --hours 48
//!
//! # One-shot views
//! cauldron-ops --data-dir data rates
//! cauldron-ops --data-dir data reconcile
//! cauldron-ops --data-dir data plan
//! cauldron-ops --data-dir data status --entity cauldron_001
//!
//! # Keep refreshing until Ctrl+C
//! cauldron-ops --data-dir data watch
//! ```
//!
//! # Environment Variables
//!
//! - `CAULDRON_CONFIG`: path to a TOML config file
//! - `CAULDRON_DATA_DIR`: default data directory
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cauldron_ops::config::{self, OpsConfig};
use cauldron_ops::ingest::{FileSource, SnapshotSource};
use cauldron_ops::pipeline::Coordinator;
use cauldron_ops::background::RateRefresher;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cauldron-ops")]
#[command(about = "Cauldron fill monitoring, ticket reconciliation and courier dispatch planning")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides CAULDRON_CONFIG and ./cauldron_ops.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the snapshot JSON files
    #[arg(long, env = "CAULDRON_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Estimated fill/drain rates per entity
    Rates,
    /// Reconcile tickets against observed drains
    Reconcile,
    /// Overflow forecast, soonest first
    Forecast,
    /// Courier route plan for entities overflowing within the horizon
    Plan,
    /// Live status of one or all entities
    Status {
        #[arg(long)]
        entity: Option<String>,
    },
    /// Start draining an entity
    Dispatch {
        entity: String,
    },
    /// Refresh periodically and log summaries until Ctrl+C
    Watch,
}

/// Background tasks supervised in watch mode.
#[derive(Debug, Clone, Copy)]
enum TaskName {
    Reporter,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Reporter => write!(f, "Reporter"),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let ops_config = match &args.config {
        Some(path) => OpsConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OpsConfig::load(),
    };
    config::init(ops_config.clone());

    let source: Arc<dyn SnapshotSource> = Arc::new(FileSource::new(&args.data_dir));
    let (coordinator, report) = Coordinator::from_source(ops_config, source.as_ref(), Utc::now())
        .await
        .with_context(|| format!("loading snapshot from {}", args.data_dir.display()))?;
    for (feed, outcome) in &report.feeds {
        if !outcome.is_updated() {
            warn!(feed = %feed, "Feed unavailable at startup");
        }
    }
    let coordinator = Arc::new(coordinator);

    let now = Utc::now();
    match args.command {
        SubCommand::Rates => print_json(&coordinator.rates().await),
        SubCommand::Reconcile => print_json(&coordinator.reconcile().await),
        SubCommand::Forecast => print_json(&coordinator.forecast(now).await),
        SubCommand::Plan => print_json(&coordinator.plan_routes(now).await),
        SubCommand::Status { entity: Some(id) } => {
            print_json(&coordinator.live_status(&id, now).await?)
        }
        SubCommand::Status { entity: None } => print_json(&coordinator.all_status(now).await),
        SubCommand::Dispatch { entity } => print_json(&coordinator.dispatch(&entity, now).await?),
        SubCommand::Watch => run_watch(coordinator, source).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{out}");
    Ok(())
}

// ============================================================================
// Watch Mode
// ============================================================================

async fn run_watch(coordinator: Arc<Coordinator>, source: Arc<dyn SnapshotSource>) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut refresher = RateRefresher::from_config(&coordinator);
    refresher.start(Arc::clone(&coordinator), Some(source));

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_reporter(&mut task_set, Arc::clone(&coordinator), cancel_token.clone());

    let result = run_supervisor(&mut task_set, cancel_token).await;

    if let Some(cycles) = refresher.stop().await {
        info!(cycles, "Rate refresher stopped");
    }
    result
}

/// Periodic reconciliation and plan summaries.
fn spawn_reporter(
    task_set: &mut JoinSet<Result<TaskName>>,
    coordinator: Arc<Coordinator>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let period = Duration::from_secs(coordinator.config().rates.refresh_interval_secs);
        info!("[Reporter] Task starting with interval {:?}", period);
        let mut interval = tokio::time::interval(period);
        let mut reports = 0u64;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!(reports, "[Reporter] Received shutdown signal");
                    return Ok(TaskName::Reporter);
                }
                _ = interval.tick() => {
                    let report = coordinator.reconcile().await;
                    let plan = coordinator.plan_routes(Utc::now()).await;
                    let stats = coordinator.stats().await;
                    reports += 1;
                    info!(
                        entities = stats.entities,
                        samples = stats.samples,
                        suspicious = report.suspicious_count(),
                        unmatched_drains = report.unmatched_drains.len(),
                        couriers = plan.required_couriers,
                        impossible = plan.impossible.len(),
                        draining = stats.draining,
                        "[Reporter] Summary"
                    );
                }
            }
        }
    });
}

async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }
    Ok(())
}
