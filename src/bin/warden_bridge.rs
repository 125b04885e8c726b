//! The warden bridge: persists the agent's event stream
//!
//! Reads line-delimited event JSON on stdin (normally piped from
//! `wardend`), stores each event durably, and fans it out to live
//! subscribers. Runs in its own process so an agent crash and a store
//! outage stay independent failures.

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warden::bridge::live::LiveHub;
use warden::bridge::Bridge;
use warden::config::Config;
use warden::health::HealthMonitor;
use warden::store::Database;

/// Command-line arguments for the warden bridge
#[derive(Parser)]
#[command(
    name = "warden-bridge",
    about = "Event stream consumer and store for the warden agent",
    long_about = "Consumes line-delimited event JSON from stdin, persists events to the \
                  configured SQLite store with bounded retry and overflow buffering, and \
                  distributes them to live subscribers. Exits when the stream closes."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting warden bridge");

    let config = Config::load(cli.config.as_deref());

    let db = Database::open(&config.storage.db_path)
        .with_context(|| format!("cannot open store at {}", config.storage.db_path.display()))?;
    let live = LiveHub::new(config.bridge.subscriber_capacity);
    let health = Arc::new(HealthMonitor::new());

    let mut bridge = Bridge::new(
        &db,
        &live,
        Arc::clone(&health),
        config.bridge.insert_attempts,
        Duration::from_millis(config.bridge.insert_backoff_millis),
        config.bridge.overflow_capacity,
    );

    let stdin = std::io::stdin();
    let consumed = bridge
        .run(stdin.lock())
        .context("event stream failed")?;

    let stats = db.stats().context("cannot read store statistics")?;
    info!(
        "Bridge consumed {} events; store holds {} ({} rule-triggered)",
        consumed, stats.total, stats.rules_triggered
    );

    match serde_json::to_string(&health.snapshot()) {
        Ok(snapshot) => info!("Final bridge health: {}", snapshot),
        Err(e) => log::error!("Cannot serialize health snapshot: {}", e),
    }

    info!("warden bridge shutdown complete");
    Ok(())
}
