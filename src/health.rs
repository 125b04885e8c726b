//! Health tracking for the pipeline itself
//!
//! Producers, the collector, and the bridge share one `HealthMonitor` and
//! record recoverable failures on it: skipped paths, dropped events,
//! degraded queues, producers that exhausted their retries. The pipeline
//! keeps running in a degraded-but-visible state rather than losing events
//! silently.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Shared health state for all pipeline components
#[derive(Debug, Default)]
pub struct HealthMonitor {
    skipped_paths: AtomicU64,
    serialization_failures: AtomicU64,
    parse_failures: AtomicU64,
    queue_send_timeouts: AtomicU64,
    overflow_dropped: AtomicU64,
    queue_degraded: AtomicBool,
    store_degraded: AtomicBool,
    producers_down: Mutex<Vec<String>>,
}

/// Point-in-time copy of the health state, serializable for logging
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub skipped_paths: u64,
    pub serialization_failures: u64,
    pub parse_failures: u64,
    pub queue_send_timeouts: u64,
    pub overflow_dropped: u64,
    pub queue_degraded: bool,
    pub store_degraded: bool,
    pub producers_down: Vec<String>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path the file watcher could not observe
    pub fn record_skipped_path(&self) {
        self.skipped_paths.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event dropped because it could not be encoded
    pub fn record_serialization_failure(&self) {
        self.serialization_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a bridge input line that failed to parse
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a producer submission that timed out on a full queue
    ///
    /// Sustained overflow marks the queue degraded; the flag stays set so
    /// the condition is visible even after pressure subsides.
    pub fn record_queue_send_timeout(&self) {
        self.queue_send_timeouts.fetch_add(1, Ordering::Relaxed);
        self.queue_degraded.store(true, Ordering::Relaxed);
    }

    /// Record an event evicted from the bridge's overflow buffer
    pub fn record_overflow_drop(&self) {
        self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
        self.store_degraded.store(true, Ordering::Relaxed);
    }

    /// Mark the store sink degraded (insert retries exhausted)
    pub fn set_store_degraded(&self, degraded: bool) {
        self.store_degraded.store(degraded, Ordering::Relaxed);
    }

    /// Record that a producer exhausted its retries and is down
    pub fn record_producer_down(&self, name: &str) {
        let mut down = self.producers_down.lock().unwrap();
        if !down.iter().any(|n| n == name) {
            down.push(name.to_string());
        }
    }

    /// Clear a producer-down signal after its source is re-established
    pub fn record_producer_recovered(&self, name: &str) {
        let mut down = self.producers_down.lock().unwrap();
        down.retain(|n| n != name);
    }

    pub fn is_store_degraded(&self) -> bool {
        self.store_degraded.load(Ordering::Relaxed)
    }

    pub fn is_queue_degraded(&self) -> bool {
        self.queue_degraded.load(Ordering::Relaxed)
    }

    /// Capture the current health state
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            skipped_paths: self.skipped_paths.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            queue_send_timeouts: self.queue_send_timeouts.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            queue_degraded: self.queue_degraded.load(Ordering::Relaxed),
            store_degraded: self.store_degraded.load(Ordering::Relaxed),
            producers_down: self.producers_down.lock().unwrap().clone(),
        }
    }
}
