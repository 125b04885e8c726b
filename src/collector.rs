//! Collector: merges producer outputs into one ordered, rule-annotated stream
//!
//! Producers submit owned events into a bounded queue; the collector drains
//! it in arrival order, runs the rule engine synchronously on each event,
//! and writes exactly one flushed JSON line per event to its output. Each
//! event is processed start-to-finish on the collector thread, so output
//! lines are never interleaved.

use crate::error::PipelineError;
use crate::events::SecurityEvent;
use crate::health::HealthMonitor;
use crate::rules::RuleEngine;
use log::{debug, error, info, warn};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared signal for orderly pipeline shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown; producers stop accepting OS events once they see it
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Producer-side handle to the bounded collector queue
///
/// Submission blocks with a timeout when the queue is full: a slow consumer
/// must not silently lose security-relevant events, so the producer waits;
/// sustained overflow is surfaced as queue degradation rather than loss.
#[derive(Clone)]
pub struct EventSender {
    sender: SyncSender<SecurityEvent>,
    send_timeout: Duration,
    health: Arc<HealthMonitor>,
}

/// How long a full-queue submission sleeps between retries
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(10);

impl EventSender {
    /// Submit one event, blocking up to the configured timeout if the
    /// queue is full
    ///
    /// # Errors
    ///
    /// `PipelineError::QueueFull` after the timeout elapses (recorded on
    /// the health monitor) and `PipelineError::QueueClosed` once the
    /// collector has gone away.
    pub fn send(&self, event: SecurityEvent) -> Result<(), PipelineError> {
        let deadline = Instant::now() + self.send_timeout;
        let mut event = event;

        loop {
            match self.sender.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::QueueClosed),
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        self.health.record_queue_send_timeout();
                        return Err(PipelineError::QueueFull(self.send_timeout));
                    }
                    event = returned;
                    std::thread::sleep(SEND_RETRY_INTERVAL);
                }
            }
        }
    }
}

/// Create the bounded producer-to-collector queue
pub fn event_queue(
    capacity: usize,
    send_timeout: Duration,
    health: Arc<HealthMonitor>,
) -> (EventSender, Receiver<SecurityEvent>) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (
        EventSender {
            sender,
            send_timeout,
            health,
        },
        receiver,
    )
}

/// The collector stage: queue drain, rule evaluation, line serialization
pub struct Collector<W: Write> {
    receiver: Receiver<SecurityEvent>,
    rule_engine: RuleEngine,
    output: W,
    health: Arc<HealthMonitor>,
    shutdown: ShutdownFlag,
}

impl<W: Write> Collector<W> {
    pub fn new(
        receiver: Receiver<SecurityEvent>,
        rule_engine: RuleEngine,
        output: W,
        health: Arc<HealthMonitor>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            receiver,
            rule_engine,
            output,
            health,
            shutdown,
        }
    }

    /// Run the collector loop until every producer handle is dropped
    ///
    /// After shutdown is signaled the loop keeps draining: events already
    /// queued are annotated and written before the channel disconnects, so
    /// nothing that reached the queue is lost. Returns the number of lines
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Io` if the output stream fails; individual
    /// serialization failures are counted and skipped, never fatal.
    pub fn run(&mut self) -> Result<u64, PipelineError> {
        info!(
            "Collector started with {} rules",
            self.rule_engine.rule_count()
        );
        let mut written = 0u64;

        loop {
            match self.receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if self.emit(event)? {
                        written += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_tripped() {
                        debug!("Collector idle after shutdown signal, waiting for drain");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("All producers disconnected, collector stopping");
                    break;
                }
            }
        }

        self.output.flush()?;
        info!("Collector wrote {} events", written);
        Ok(written)
    }

    /// Consume the collector and return its output writer
    pub fn into_output(self) -> W {
        self.output
    }

    /// Annotate and serialize a single event; one line, flushed
    fn emit(&mut self, event: SecurityEvent) -> Result<bool, PipelineError> {
        let event = self.rule_engine.annotate(event);
        if event.rule_triggered {
            debug!(
                "Rule '{}' matched event {}",
                event.rule_name.as_deref().unwrap_or(""),
                event.id
            );
        }

        match event.to_json() {
            Ok(json) => {
                if let Err(e) = writeln!(self.output, "{}", json) {
                    error!("Failed to write event stream: {}", e);
                    return Err(PipelineError::Io(e));
                }
                // Flushed per line so downstream consumers see events promptly
                self.output.flush()?;
                Ok(true)
            }
            Err(e) => {
                warn!("Dropping unserializable event {}: {}", event.id, e);
                self.health.record_serialization_failure();
                Ok(false)
            }
        }
    }
}
