//! packtrack node binary
//!
//! ```text
//! packtrack --node-id n1 insert-range --tracker bring --start 1000001 --end 1000004
//! packtrack --node-id n1 perform
//! packtrack --node-id n1 crawl --start 1000001 --end 1000004 --workers 4
//! ```
//!
//! Logs go to stderr; `crawl` writes one JSON record per line to stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use packtrack_core::kernel::jobs::{
    enqueue_range, IdentifierRange, JobDriver, JobStore, PostgresJobStore,
};
use packtrack_core::kernel::pool::{PoolStreams, WorkerPool, WorkerPoolConfig};
use packtrack_core::kernel::{BaseTrackingProvider, BringProvider, CapabilityRegistry};
use packtrack_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "packtrack")]
#[command(about = "Distributed shipment tracking scraper")]
struct Cli {
    /// Identity of this node, recorded with every job it completes
    #[arg(long, env = "NODE_ID")]
    node_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue one job per identifier in [start, end)
    InsertRange {
        #[arg(long, default_value = "bring")]
        tracker: String,
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
    },

    /// Claim and process jobs until interrupted
    Perform,

    /// Fetch [start, end) through the worker pool without the job store
    Crawl {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 16)]
        input_buffer: usize,
        #[arg(long, default_value_t = 16)]
        output_buffer: usize,
        #[arg(long, default_value_t = 16)]
        error_buffer: usize,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,packtrack_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let node_id = validate_node_id(&cli.node_id)?;
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::InsertRange {
            tracker,
            start,
            end,
        } => {
            let range = IdentifierRange::new(start, end)?;
            insert_range(&config, &tracker, range).await
        }
        Commands::Perform => perform(&config, node_id).await,
        Commands::Crawl {
            start,
            end,
            workers,
            input_buffer,
            output_buffer,
            error_buffer,
            interval_ms,
        } => {
            let range = IdentifierRange::new(start, end)?;
            let pool_config = WorkerPoolConfig {
                workers,
                input_buffer,
                output_buffer,
                error_buffer,
                min_interval: Duration::from_millis(interval_ms),
                fetch_timeout: config.fetch_timeout,
            };
            crawl(&config, pool_config, range).await
        }
    }
}

fn validate_node_id(node_id: &str) -> Result<&str> {
    let node_id = node_id.trim();
    if node_id.is_empty() {
        bail!("--node-id must not be empty");
    }
    Ok(node_id)
}

async fn connect_store(config: &Config) -> Result<PostgresJobStore> {
    tracing::info!("Connecting to database...");
    let store = PostgresJobStore::connect(config.database_url()?)
        .await
        .context("Failed to connect to database")?;

    store.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Database ready");

    Ok(store)
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
        trigger.cancel();
    });
    token
}

async fn insert_range(config: &Config, tracker: &str, range: IdentifierRange) -> Result<()> {
    let store = connect_store(config).await?;

    let Some(tracker) = store.find_tracker(tracker).await? else {
        bail!("unknown tracker: {}", tracker);
    };

    let inserted = enqueue_range(&store, tracker.id, range).await?;
    tracing::info!(tracker = %tracker.name, inserted, "Range enqueued");

    Ok(())
}

async fn perform(config: &Config, node_id: &str) -> Result<()> {
    let store = connect_store(config).await?;

    let bring = BringProvider::with_config(&config.bring_tracking_url, config.fetch_timeout)?;
    let providers: Vec<Arc<dyn BaseTrackingProvider>> = vec![Arc::new(bring)];
    let trackers = store.list_trackers().await?;
    let capabilities = CapabilityRegistry::resolve(&trackers, providers)?;

    let driver = JobDriver::new(
        Arc::new(store),
        capabilities,
        config.claim_settings(node_id)?,
        config.backoff.clone(),
    );

    let completed = driver.run(shutdown_on_ctrl_c()).await;
    tracing::info!(node_id, completed, "Node stopped");

    Ok(())
}

async fn crawl(config: &Config, pool_config: WorkerPoolConfig, range: IdentifierRange) -> Result<()> {
    let bring = BringProvider::with_config(&config.bring_tracking_url, config.fetch_timeout)?;
    let (pool, streams) = WorkerPool::start(pool_config, Arc::new(bring));
    let PoolStreams {
        mut outputs,
        mut errors,
    } = streams;

    let print_outputs = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(resp) = outputs.recv().await {
            match serde_json::to_string(&resp) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(input = %resp.input, error = %e, "Failed to encode response"),
            }
            count += 1;
        }
        count
    });
    let print_errors = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(err) = errors.recv().await {
            match serde_json::to_string(&err) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(input = %err.input, error = %e, "Failed to encode error"),
            }
            count += 1;
        }
        count
    });

    let shutdown = shutdown_on_ctrl_c();
    for identifier in range.identifiers() {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            submitted = pool.submit(identifier) => submitted?,
        }
    }

    pool.close().await;
    let fetched = print_outputs.await.context("output printer failed")?;
    let failed = print_errors.await.context("error printer failed")?;
    tracing::info!(fetched, failed, "Crawl finished");

    Ok(())
}
