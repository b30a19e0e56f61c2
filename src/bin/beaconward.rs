//! Beaconward evaluator entry point.
//!
//! Runs the presence evaluator against a SQLite database, either once
//! (`--once`, printing the tick report as JSON) or periodically until
//! interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beaconward::evaluator::{Evaluator, Scheduler};
use beaconward::{BeaconwardConfig, SqliteStore};

#[derive(Debug, Parser)]
#[command(name = "beaconward", version, about = "Beacon presence evaluator")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides configuration)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run a single evaluation tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut config =
        BeaconwardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.storage.path = db;
    }

    let store = SqliteStore::open(&config.storage.path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.storage.path.display()
        )
    })?;
    let evaluator =
        Evaluator::new(Arc::new(store), config.thresholds()).with_retry(config.retry_policy());
    let scheduler = Scheduler::new(evaluator, config.tick_interval());

    if cli.once {
        let report = scheduler.tick().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested, finishing current tick");
    let _ = shutdown_tx.send(true);

    let ticks = runner.await.context("Evaluator task failed")?;
    info!(ticks, "bye");
    Ok(())
}
