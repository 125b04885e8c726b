//! File-integrity producer
//!
//! Subscribes to filesystem change notifications under a configured root
//! and emits one event per qualifying change. Create and modify of regular
//! files at or below a size ceiling carry a SHA-256 content hash for tamper
//! detection on later modifications of the same path; delete and rename
//! omit the hash rather than recomputing anything. Content read for
//! hashing is also scanned against a table of hostile byte patterns, and a
//! hit escalates the event to CRITICAL.

use crate::collector::EventSender;
use crate::error::ProducerError;
use crate::events::{EventKind, FileOperation, SecurityEvent, Severity};
use crate::health::HealthMonitor;
use crate::producers::{Backoff, DEGRADED_RETRY_DELAY, MAX_CONSECUTIVE_FAILURES};
use log::{debug, error, info, warn};
use notify::{Event as NotifyEvent, EventKind as NotifyKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Producer name used in logs and producer-down health signals
const PRODUCER_NAME: &str = "file_integrity";

/// Byte patterns whose presence in written content warrants escalation
///
/// Matched against the full contents of files already read for hashing;
/// the first hit names the pattern in the event's tags.
const SUSPICIOUS_CONTENT: &[(&str, &[u8])] = &[
    ("reverse_shell", b"/bin/sh -i"),
    ("dev_tcp_redirect", b"/dev/tcp/"),
    ("netcat_exec", b"nc -e "),
    ("pty_spawn", b"pty.spawn("),
];

/// File-integrity watcher producer
pub struct FileIntegrityProducer {
    root: PathBuf,
    hash_size_ceiling: u64,
    hostname: String,
    sender: EventSender,
    health: Arc<HealthMonitor>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl FileIntegrityProducer {
    pub fn new(
        root: PathBuf,
        hash_size_ceiling: u64,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            root,
            hash_size_ceiling,
            hostname,
            sender,
            health,
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start watching the configured root
    ///
    /// # Errors
    ///
    /// Returns `ProducerError::WatchSetup` if the root does not exist — a
    /// missing watch root at startup is the one fatal producer condition.
    pub fn start(&mut self) -> Result<(), ProducerError> {
        if !self.root.is_dir() {
            return Err(ProducerError::WatchSetup(format!(
                "watch root does not exist or is not a directory: {}",
                self.root.display()
            )));
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already running
        }

        let root = self.root.clone();
        let ceiling = self.hash_size_ceiling;
        let hostname = self.hostname.clone();
        let sender = self.sender.clone();
        let health = Arc::clone(&self.health);
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            Self::watch_loop(root, ceiling, hostname, sender, health, running);
        });
        self.thread_handle = Some(handle);
        info!("FileIntegrityProducer watching {}", self.root.display());
        Ok(())
    }

    /// Stop the producer and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("FileIntegrityProducer thread panicked");
            }
        }
        info!("FileIntegrityProducer stopped");
    }

    /// Outer loop: (re)establish the watcher with backoff on failure
    fn watch_loop(
        root: PathBuf,
        ceiling: u64,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
        running: Arc<AtomicBool>,
    ) {
        let mut backoff = Backoff::new();
        let mut consecutive_failures = 0u32;

        while running.load(Ordering::SeqCst) {
            match Self::run_watcher(&root, ceiling, &hostname, &sender, &health, &running) {
                Ok(()) => {
                    // Clean stop requested
                    break;
                }
                Err(e) => {
                    warn!("File watch lost: {}", e);
                    consecutive_failures += 1;
                }
            }

            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(
                    "File watcher failed {} times, reporting producer down",
                    consecutive_failures
                );
                health.record_producer_down(PRODUCER_NAME);
                super::interruptible_sleep(DEGRADED_RETRY_DELAY, &running);
                consecutive_failures = 0;
                backoff.reset();
                continue;
            }

            let delay = backoff.next_delay();
            warn!(
                "Re-establishing file watch in {:?} (failure #{}/{})",
                delay, consecutive_failures, MAX_CONSECUTIVE_FAILURES
            );
            super::interruptible_sleep(delay, &running);
        }

        info!("File integrity watch loop finished");
    }

    /// One watcher session; returns Ok on requested stop, Err on watch loss
    fn run_watcher(
        root: &Path,
        ceiling: u64,
        hostname: &str,
        sender: &EventSender,
        health: &HealthMonitor,
        running: &AtomicBool,
    ) -> Result<(), ProducerError> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(notify_tx)?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        health.record_producer_recovered(PRODUCER_NAME);
        debug!("File watcher established on {}", root.display());

        while running.load(Ordering::SeqCst) {
            match notify_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Ok(raw)) => {
                    if let Some(event) = Self::translate(raw, ceiling, hostname, health) {
                        if let Err(e) = sender.send(event) {
                            warn!("Failed to submit file event: {}", e);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Filesystem notification error: {}", e);
                    health.record_skipped_path();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ProducerError::WatchLost(
                        "notification channel disconnected".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Convert a raw notification into an event, or skip it
    fn translate(
        raw: NotifyEvent,
        ceiling: u64,
        hostname: &str,
        health: &HealthMonitor,
    ) -> Option<SecurityEvent> {
        let operation = classify_operation(&raw.kind)?;
        let path = raw.paths.first()?;
        let path_str = path.to_string_lossy().to_string();

        let report = match operation {
            FileOperation::Created | FileOperation::Modified => {
                match inspect_regular_file(path, ceiling) {
                    Ok(report) => report,
                    Err(e) => {
                        debug!("Skipping unreadable path {}: {}", path.display(), e);
                        health.record_skipped_path();
                        return None;
                    }
                }
            }
            // Content is neither hashed nor scanned for delete and rename
            FileOperation::Deleted | FileOperation::Renamed => None,
        };

        let matched = report.as_ref().and_then(|r| r.matched);
        let severity = match matched {
            // Hostile content overrides the path heuristic
            Some(_) => Severity::Critical,
            None => classify_path_severity(&path_str),
        };

        let mut event = SecurityEvent::new(
            severity,
            EventKind::FileIntegrity {
                path: path_str,
                operation,
                content_hash: report.map(|r| r.hash),
            },
            hostname.to_string(),
        )
        .with_tag("file_monitor");
        if let Some(pattern) = matched {
            event = event.with_tag("content_match").with_tag(pattern);
        }
        Some(event)
    }
}

/// Map a notify event kind onto the reported operation set
fn classify_operation(kind: &NotifyKind) -> Option<FileOperation> {
    match kind {
        NotifyKind::Create(_) => Some(FileOperation::Created),
        NotifyKind::Modify(notify::event::ModifyKind::Name(_)) => Some(FileOperation::Renamed),
        NotifyKind::Modify(_) => Some(FileOperation::Modified),
        NotifyKind::Remove(_) => Some(FileOperation::Deleted),
        _ => None,
    }
}

/// Severity heuristic from path sensitivity
fn classify_path_severity(path: &str) -> Severity {
    if path.contains("/etc") || path.contains("passwd") || path.contains("shadow") {
        Severity::High
    } else if path.ends_with(".conf") || path.ends_with(".cfg") {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Outcome of reading a created or modified regular file
struct ContentReport {
    hash: String,
    matched: Option<&'static str>,
}

/// Hash and scan a regular file at or below the size ceiling
///
/// Returns `Ok(None)` for non-regular or oversized files (the event is
/// still emitted, hashless and unscanned); an IO error means the path
/// itself could not be observed and the caller skips it.
fn inspect_regular_file(path: &Path, ceiling: u64) -> std::io::Result<Option<ContentReport>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        // Deleted between notification and stat: report without a hash
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() || metadata.len() > ceiling {
        return Ok(None);
    }

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(Some(ContentReport {
        hash: format!("{:x}", hasher.finalize()),
        matched: scan_content(&data),
    }))
}

/// First suspicious pattern contained in the data, if any
fn scan_content(data: &[u8]) -> Option<&'static str> {
    SUSPICIOUS_CONTENT
        .iter()
        .find(|(_, pattern)| {
            data.len() >= pattern.len() && data.windows(pattern.len()).any(|w| w == *pattern)
        })
        .map(|(name, _)| *name)
}
