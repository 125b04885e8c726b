//! The warden agent: observes the host and streams events to stdout
//!
//! Producers watch files, processes, sockets, and the system log; the
//! collector merges their events, applies the detection rules, and writes
//! one JSON line per event to stdout. Pipe stdout into `warden-bridge` to
//! persist and fan out the stream.

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use warden::collector::{event_queue, Collector, ShutdownFlag};
use warden::config::Config;
use warden::health::HealthMonitor;
use warden::producers::process_sample::ActivityFloor;
use warden::producers::{
    FileIntegrityProducer, NetworkSocketProducer, ProcessSampleProducer, SystemLogProducer,
};
use warden::rules::RuleEngine;

/// Command-line arguments for the warden agent
#[derive(Parser)]
#[command(
    name = "wardend",
    about = "Security event monitoring agent",
    long_about = "Observes file changes, process activity, network sockets, and the system \
                  log on the local host, applies detection rules, and emits one JSON event \
                  per line on stdout for consumption by warden-bridge."
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

    info!("Starting warden agent");

    let config = Config::load(cli.config.as_deref());

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let health = Arc::new(HealthMonitor::new());
    let (sender, receiver) = event_queue(
        config.pipeline.queue_capacity,
        Duration::from_millis(config.pipeline.send_timeout_millis),
        Arc::clone(&health),
    );
    let shutdown = ShutdownFlag::new();

    // Collector thread owns the queue's receiving end and stdout
    let collector_health = Arc::clone(&health);
    let collector_shutdown = shutdown.clone();
    let collector_handle = std::thread::spawn(move || {
        let stdout = std::io::stdout();
        let mut collector = Collector::new(
            receiver,
            RuleEngine::new(),
            stdout.lock(),
            collector_health,
            collector_shutdown,
        );
        if let Err(e) = collector.run() {
            error!("Collector failed: {}", e);
        }
    });

    let mut file_producer = FileIntegrityProducer::new(
        config.watch.root.clone(),
        config.watch.hash_size_ceiling_bytes,
        hostname.clone(),
        sender.clone(),
        Arc::clone(&health),
    );
    let mut process_producer = ProcessSampleProducer::new(
        Duration::from_secs(config.process.interval_seconds),
        ActivityFloor {
            min_cpu_percent: config.process.min_cpu_percent,
            min_memory_bytes: config.process.min_memory_bytes,
        },
        hostname.clone(),
        sender.clone(),
    );
    let mut network_producer = NetworkSocketProducer::new(
        Duration::from_secs(config.network.interval_seconds),
        hostname.clone(),
        sender.clone(),
        Arc::clone(&health),
    );
    let mut log_producer = SystemLogProducer::new(
        config.syslog.path.clone(),
        Duration::from_millis(config.syslog.poll_interval_millis),
        hostname,
        sender,
        Arc::clone(&health),
    );

    // A missing watch root is a configuration mistake, not a transient
    // failure; the other producers tolerate source loss and start anyway
    file_producer
        .start()
        .with_context(|| format!("cannot watch {}", config.watch.root.display()))?;
    process_producer.start();
    network_producer.start();
    log_producer.start();

    info!("All producers started, agent is running. Press Ctrl+C to stop.");

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    let ctrlc_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        ctrlc_shutdown.trip();
        let _ = shutdown_sender.send(());
    })
    .context("cannot install signal handler")?;

    let _ = shutdown_receiver.recv();

    // Stop producers first so no new events are accepted, then release
    // their queue handles; the collector drains what is already queued and
    // exits once the last sender is gone
    file_producer.stop();
    process_producer.stop();
    network_producer.stop();
    log_producer.stop();
    drop(file_producer);
    drop(process_producer);
    drop(network_producer);
    drop(log_producer);

    if collector_handle.join().is_err() {
        error!("Collector thread panicked");
    }

    match serde_json::to_string(&health.snapshot()) {
        Ok(snapshot) => info!("Final pipeline health: {}", snapshot),
        Err(e) => error!("Cannot serialize health snapshot: {}", e),
    }

    info!("warden agent shutdown complete");
    Ok(())
}
