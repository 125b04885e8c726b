//! System log producer
//!
//! Tails the host's log file and emits one event per new line. The line is
//! carried verbatim as the message; the originating subsystem and a
//! severity token are extracted from the line where present. Rotation and
//! truncation are detected by offset tracking and trigger a reopen from
//! the start of the new file.

use crate::collector::EventSender;
use crate::error::ProducerError;
use crate::events::{EventKind, SecurityEvent, Severity};
use crate::health::HealthMonitor;
use crate::producers::{Backoff, DEGRADED_RETRY_DELAY, MAX_CONSECUTIVE_FAILURES};
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Producer name used in logs and producer-down health signals
const PRODUCER_NAME: &str = "system_log";

/// Severity tokens recognized in log lines, scanned in this order
const LEVEL_TOKENS: &[&str] = &[
    "emerg", "alert", "crit", "fatal", "error", "err", "fail", "warn", "notice", "debug",
];

/// Incremental reader over a growing (and occasionally rotated) log file
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
}

impl LogTailer {
    /// Open the log source, positioned at the end (only new lines are
    /// reported)
    pub fn open(path: &Path) -> Result<Self, ProducerError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let offset = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            offset,
        })
    }

    /// Reopen from the start of the (new) file after rotation
    fn reopen(&mut self) -> Result<(), ProducerError> {
        let file = File::open(&self.path)?;
        self.reader = BufReader::new(file);
        self.offset = 0;
        Ok(())
    }

    /// Read all complete lines appended since the last poll
    ///
    /// A shrinking file means truncation or rotation; the tailer reopens
    /// from the start so the new file's content is not skipped.
    pub fn poll(&mut self) -> Result<Vec<String>, ProducerError> {
        let current_len = std::fs::metadata(&self.path)?.len();
        if current_len < self.offset {
            debug!("Log source {} truncated, reopening", self.path.display());
            self.reopen()?;
        }

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            // Hold a partial line until its newline arrives
            if !line.ends_with('\n') {
                self.reader.seek(SeekFrom::Start(self.offset))?;
                break;
            }
            self.offset += read as u64;
            let line = line.trim_end().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

/// Extract the originating subsystem token from a syslog-style line
///
/// The first word ending in `:` (with any `[pid]` suffix stripped) is
/// taken as the source; lines without one fall back to "system".
pub fn parse_source(line: &str) -> String {
    for word in line.split_whitespace() {
        if let Some(stem) = word.strip_suffix(':') {
            // Timestamps like "12:34:56" are not subsystem tokens
            if stem.chars().all(|c| c.is_ascii_digit() || c == ':') {
                continue;
            }
            let stem = match stem.find('[') {
                Some(idx) => &stem[..idx],
                None => stem,
            };
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    "system".to_string()
}

/// Find the severity token carried by a line
///
/// Tokens match a whole word or its leading stem ("failed", "warning"),
/// never mid-word, so text like "transferred" stays informational.
pub fn parse_level(line: &str) -> String {
    let lower = line.to_lowercase();
    for token in LEVEL_TOKENS {
        let hit = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word.starts_with(token));
        if hit {
            return (*token).to_string();
        }
    }
    "info".to_string()
}

/// Map the extracted level token onto the event severity scale
pub fn level_severity(level: &str) -> Severity {
    match level {
        "emerg" | "alert" | "crit" | "fatal" | "error" | "err" | "fail" => Severity::High,
        "warn" => Severity::Medium,
        _ => Severity::Info,
    }
}

/// Tailer-backed producer for the host's log source
pub struct SystemLogProducer {
    path: PathBuf,
    poll_interval: Duration,
    hostname: String,
    sender: EventSender,
    health: Arc<HealthMonitor>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl SystemLogProducer {
    pub fn new(
        path: PathBuf,
        poll_interval: Duration,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            path,
            poll_interval,
            hostname,
            sender,
            health,
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the tailer thread
    ///
    /// An unopenable log source is not fatal: the producer starts anyway
    /// and keeps retrying with backoff, reporting down after repeated
    /// failures.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running
        }

        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let hostname = self.hostname.clone();
        let sender = self.sender.clone();
        let health = Arc::clone(&self.health);
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            Self::tail_loop(path, poll_interval, hostname, sender, health, running);
        });
        self.thread_handle = Some(handle);
        info!("SystemLogProducer tailing {}", self.path.display());
    }

    /// Stop the producer and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("SystemLogProducer thread panicked");
            }
        }
        info!("SystemLogProducer stopped");
    }

    fn tail_loop(
        path: PathBuf,
        poll_interval: Duration,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
        running: Arc<AtomicBool>,
    ) {
        let mut tailer: Option<LogTailer> = None;
        let mut backoff = Backoff::new();
        let mut consecutive_failures = 0u32;

        while running.load(Ordering::SeqCst) {
            // (Re)establish the tailer if needed
            if tailer.is_none() {
                match LogTailer::open(&path) {
                    Ok(t) => {
                        health.record_producer_recovered(PRODUCER_NAME);
                        consecutive_failures = 0;
                        backoff.reset();
                        tailer = Some(t);
                    }
                    Err(e) => {
                        warn!("Cannot open log source {}: {}", path.display(), e);
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            health.record_producer_down(PRODUCER_NAME);
                            super::interruptible_sleep(DEGRADED_RETRY_DELAY, &running);
                            consecutive_failures = 0;
                            backoff.reset();
                        } else {
                            super::interruptible_sleep(backoff.next_delay(), &running);
                        }
                        continue;
                    }
                }
            }

            match tailer.as_mut().unwrap().poll() {
                Ok(lines) => {
                    for line in lines {
                        let source = parse_source(&line);
                        let level = parse_level(&line);
                        let severity = level_severity(&level);

                        let event = SecurityEvent::new(
                            severity,
                            EventKind::SystemLogLine {
                                source,
                                level,
                                message: line,
                            },
                            hostname.clone(),
                        )
                        .with_tag("log_monitor");

                        if let Err(e) = sender.send(event) {
                            warn!("Failed to submit log event: {}", e);
                        }
                    }
                    super::interruptible_sleep(poll_interval, &running);
                }
                Err(e) => {
                    warn!("Log tail failed on {}: {}", path.display(), e);
                    tailer = None;
                    consecutive_failures += 1;
                }
            }
        }

        info!("System log tail loop finished");
    }
}
