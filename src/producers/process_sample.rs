//! Process sampling producer
//!
//! On a fixed interval, enumerates running processes and emits one event
//! per process above the configured minimum-activity floor; CPU percent is
//! the delta over the sampling interval as computed by successive sysinfo
//! refreshes. A synthetic aggregate sample summarizing host-wide CPU and
//! memory is emitted every tick for dashboard consumption.

use crate::collector::EventSender;
use crate::events::{EventKind, SecurityEvent, Severity};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};

/// Minimum-activity floor for per-process reporting
#[derive(Debug, Clone, Copy)]
pub struct ActivityFloor {
    pub min_cpu_percent: f32,
    pub min_memory_bytes: u64,
}

impl ActivityFloor {
    /// A process is reported when it crosses either floor
    fn admits(&self, cpu_percent: f32, memory_bytes: u64) -> bool {
        cpu_percent >= self.min_cpu_percent || memory_bytes >= self.min_memory_bytes
    }
}

/// Interval sampler for process resource usage
///
/// Sampling itself cannot lose its source (the process table is always
/// readable), so unlike the watcher and tailer producers there is no
/// backoff or producer-down path here; queue pressure is reported by the
/// sender.
pub struct ProcessSampleProducer {
    interval: Duration,
    floor: ActivityFloor,
    hostname: String,
    sender: EventSender,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl ProcessSampleProducer {
    pub fn new(
        interval: Duration,
        floor: ActivityFloor,
        hostname: String,
        sender: EventSender,
    ) -> Self {
        Self {
            interval,
            floor,
            hostname,
            sender,
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
        let floor = self.floor;
        let hostname = self.hostname.clone();
        let sender = self.sender.clone();
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            Self::sample_loop(interval, floor, hostname, sender, running);
        });
        self.thread_handle = Some(handle);
        info!("ProcessSampleProducer started with interval {:?}", self.interval);
    }

    /// Stop the producer and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("ProcessSampleProducer thread panicked");
            }
        }
        info!("ProcessSampleProducer stopped");
    }

    fn sample_loop(
        interval: Duration,
        floor: ActivityFloor,
        hostname: String,
        sender: EventSender,
        running: Arc<AtomicBool>,
    ) {
        let mut sys = System::new_all();

        while running.load(Ordering::SeqCst) {
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            sys.refresh_processes(ProcessesToUpdate::All);

            // Per-process samples above the activity floor
            for (pid, process) in sys.processes() {
                let cpu_percent = process.cpu_usage();
                let memory_bytes = process.memory();
                if !floor.admits(cpu_percent, memory_bytes) {
                    continue;
                }

                let event = SecurityEvent::new(
                    Severity::Info,
                    EventKind::ProcessSample {
                        pid: pid.as_u32(),
                        name: process.name().to_string_lossy().to_string(),
                        cpu_percent,
                        memory_bytes,
                    },
                    hostname.clone(),
                )
                .with_tag("process_monitor");

                if let Err(e) = sender.send(event) {
                    warn!("Failed to submit process sample: {}", e);
                }
            }

            // Synthetic aggregate sample for host-wide CPU and memory
            let aggregate = SecurityEvent::new(
                Severity::Info,
                EventKind::ProcessSample {
                    pid: std::process::id(),
                    name: "system".to_string(),
                    cpu_percent: sys.global_cpu_usage(),
                    memory_bytes: sys.used_memory(),
                },
                hostname.clone(),
            )
            .with_tag("process_monitor")
            .with_tag("aggregate");

            if let Err(e) = sender.send(aggregate) {
                warn!("Failed to submit aggregate sample: {}", e);
            }

            super::interruptible_sleep(interval, &running);
        }

        info!("Process sample loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_floor_admits_either_axis() {
        let floor = ActivityFloor {
            min_cpu_percent: 1.0,
            min_memory_bytes: 50 * 1024 * 1024,
        };

        assert!(floor.admits(2.5, 0));
        assert!(floor.admits(0.0, 64 * 1024 * 1024));
        assert!(!floor.admits(0.5, 1024));
    }

    #[test]
    fn test_producer_emits_aggregate_sample() {
        let health = Arc::new(crate::health::HealthMonitor::new());
        let (sender, receiver) =
            crate::collector::event_queue(4096, Duration::from_millis(200), health);

        // Floor high enough that most per-process samples are suppressed;
        // the aggregate sample is emitted unconditionally.
        let mut producer = ProcessSampleProducer::new(
            Duration::from_millis(50),
            ActivityFloor {
                min_cpu_percent: f32::MAX,
                min_memory_bytes: u64::MAX,
            },
            "localhost".to_string(),
            sender,
        );
        producer.start();

        let event = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("expected at least one sample");
        producer.stop();

        match event.kind {
            EventKind::ProcessSample { ref name, .. } => {
                assert_eq!(name, "system");
            }
            _ => panic!("unexpected kind"),
        }
        assert!(event.tags.contains(&"aggregate".to_string()));
    }
}
