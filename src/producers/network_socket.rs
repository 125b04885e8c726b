//! Network socket producer
//!
//! On a fixed interval, enumerates open sockets from the kernel's
//! `/proc/net` tables and emits one event per socket whose state changed
//! since the previous sample: new sockets, state transitions, and closures.
//! Unchanged sockets are suppressed to bound volume. Only socket metadata
//! is observed, never payload content.

use crate::collector::EventSender;
use crate::error::ProducerError;
use crate::events::{EventKind, SecurityEvent, Severity};
use crate::health::HealthMonitor;
use crate::producers::{Backoff, DEGRADED_RETRY_DELAY, MAX_CONSECUTIVE_FAILURES};
use log::{error, info, warn};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Producer name used in logs and producer-down health signals
const PRODUCER_NAME: &str = "network_socket";

/// The `/proc/net` tables sampled each tick
const PROC_NET_SOURCES: &[(&str, &str)] = &[
    ("tcp", "/proc/net/tcp"),
    ("tcp", "/proc/net/tcp6"),
    ("udp", "/proc/net/udp"),
];

/// One observed socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub protocol: String,
    pub local_addr: String,
    pub remote_addr: Option<String>,
    pub state: String,
}

impl SocketEntry {
    /// Identity key for diffing across samples; the state is the value
    fn key(&self) -> (String, String, Option<String>) {
        (
            self.protocol.clone(),
            self.local_addr.clone(),
            self.remote_addr.clone(),
        )
    }
}

/// Interval sampler emitting socket state changes
pub struct NetworkSocketProducer {
    interval: Duration,
    hostname: String,
    sender: EventSender,
    health: Arc<HealthMonitor>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl NetworkSocketProducer {
    pub fn new(
        interval: Duration,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            interval,
            hostname,
            sender,
            health,
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sampling thread
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running
        }

        let interval = self.interval;
        let hostname = self.hostname.clone();
        let sender = self.sender.clone();
        let health = Arc::clone(&self.health);
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            Self::sample_loop(interval, hostname, sender, health, running);
        });
        self.thread_handle = Some(handle);
        info!("NetworkSocketProducer started with interval {:?}", self.interval);
    }

    /// Stop the producer and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("NetworkSocketProducer thread panicked");
            }
        }
        info!("NetworkSocketProducer stopped");
    }

    fn sample_loop(
        interval: Duration,
        hostname: String,
        sender: EventSender,
        health: Arc<HealthMonitor>,
        running: Arc<AtomicBool>,
    ) {
        let mut previous: HashMap<(String, String, Option<String>), SocketEntry> = HashMap::new();
        let mut backoff = Backoff::new();
        let mut consecutive_failures = 0u32;

        while running.load(Ordering::SeqCst) {
            match snapshot_sockets() {
                Ok(current) => {
                    if consecutive_failures > 0 {
                        health.record_producer_recovered(PRODUCER_NAME);
                        consecutive_failures = 0;
                        backoff.reset();
                    }

                    for change in diff_sockets(&previous, &current) {
                        let event = SecurityEvent::new(
                            Severity::Low,
                            EventKind::NetworkSocket {
                                local_addr: change.local_addr,
                                remote_addr: change.remote_addr,
                                protocol: change.protocol,
                                state: change.state,
                            },
                            hostname.clone(),
                        )
                        .with_tag("network_monitor");

                        if let Err(e) = sender.send(event) {
                            warn!("Failed to submit socket event: {}", e);
                        }
                    }
                    previous = current;
                    super::interruptible_sleep(interval, &running);
                }
                Err(e) => {
                    warn!("Socket enumeration failed: {}", e);
                    consecutive_failures += 1;

                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        warn!(
                            "Socket sampler failed {} times, reporting producer down",
                            consecutive_failures
                        );
                        health.record_producer_down(PRODUCER_NAME);
                        super::interruptible_sleep(DEGRADED_RETRY_DELAY, &running);
                        consecutive_failures = 0;
                        backoff.reset();
                    } else {
                        super::interruptible_sleep(backoff.next_delay(), &running);
                    }
                }
            }
        }

        info!("Network socket sample loop finished");
    }
}

/// Read and parse every configured `/proc/net` table
fn snapshot_sockets() -> Result<HashMap<(String, String, Option<String>), SocketEntry>, ProducerError>
{
    let mut sockets = HashMap::new();
    for (protocol, path) in PROC_NET_SOURCES {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProducerError::Sample(format!("{}: {}", path, e)))?;
        for line in contents.lines().skip(1) {
            if let Some(entry) = parse_socket_line(line, protocol) {
                sockets.insert(entry.key(), entry);
            }
        }
    }
    Ok(sockets)
}

/// Compute new sockets, state transitions, and closures between samples
fn diff_sockets(
    previous: &HashMap<(String, String, Option<String>), SocketEntry>,
    current: &HashMap<(String, String, Option<String>), SocketEntry>,
) -> Vec<SocketEntry> {
    let mut changes = Vec::new();

    for (key, entry) in current {
        match previous.get(key) {
            None => changes.push(entry.clone()),
            Some(prior) if prior.state != entry.state => changes.push(entry.clone()),
            Some(_) => {} // Unchanged: suppressed
        }
    }

    // Sockets gone since the previous sample are reported as closed
    for (key, entry) in previous {
        if !current.contains_key(key) {
            let mut closed = entry.clone();
            closed.state = "closed".to_string();
            changes.push(closed);
        }
    }

    changes
}

/// Parse one `/proc/net/{tcp,tcp6,udp}` row
///
/// Rows are `sl local_address rem_address st ...` with hex-encoded
/// little-endian addresses. Header and malformed rows yield `None`.
pub fn parse_socket_line(line: &str, protocol: &str) -> Option<SocketEntry> {
    let mut fields = line.split_whitespace();
    let slot = fields.next()?;
    if !slot.ends_with(':') {
        return None; // Header row
    }

    let local = parse_hex_addr(fields.next()?)?;
    let remote = parse_hex_addr(fields.next()?)?;
    let state_code = u8::from_str_radix(fields.next()?, 16).ok()?;

    // An all-zero remote means an unconnected/listening socket
    let remote_addr = if remote.ends_with(":0") {
        None
    } else {
        Some(remote)
    };

    Some(SocketEntry {
        protocol: protocol.to_string(),
        local_addr: local,
        remote_addr,
        state: socket_state_name(state_code, protocol).to_string(),
    })
}

/// Decode a kernel `ADDR:PORT` hex pair into display form
fn parse_hex_addr(field: &str) -> Option<String> {
    let (addr_hex, port_hex) = field.rsplit_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    match addr_hex.len() {
        8 => {
            let raw = u32::from_str_radix(addr_hex, 16).ok()?;
            let addr = Ipv4Addr::from(raw.swap_bytes());
            Some(format!("{}:{}", addr, port))
        }
        32 => {
            // Four little-endian 32-bit words
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr_hex[i * 8..(i + 1) * 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            let addr = Ipv6Addr::from(bytes);
            Some(format!("[{}]:{}", addr, port))
        }
        _ => None,
    }
}

/// Kernel socket state code to its conventional token
fn socket_state_name(code: u8, protocol: &str) -> &'static str {
    // UDP sockets sit in CLOSE; report the netstat-style token instead
    if protocol == "udp" && code == 0x07 {
        return "UNCONN";
    }
    match code {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}
