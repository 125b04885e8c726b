//! Event producers: independent observers of one slice of OS state each
//!
//! Every producer owns a private observation loop on its own thread and
//! communicates solely by sending owned events into the bounded collector
//! queue. A producer that loses its observation source retries with
//! exponential backoff and escalates to a producer-down health signal after
//! repeated failures instead of terminating the pipeline.

/// File-integrity watcher backed by filesystem change notifications
pub mod file_integrity;

/// Interval sampler for per-process CPU and memory usage
pub mod process_sample;

/// Interval sampler for open socket state changes
pub mod network_socket;

/// Tailer for the host's system log source
pub mod system_log;

pub use file_integrity::FileIntegrityProducer;
pub use network_socket::NetworkSocketProducer;
pub use process_sample::ProcessSampleProducer;
pub use system_log::SystemLogProducer;

use std::time::Duration;

/// Consecutive failures tolerated before a producer reports itself down
pub(crate) const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How long a down producer waits before probing its source again
pub(crate) const DEGRADED_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Exponential restart backoff shared by the producer loops
#[derive(Debug)]
pub(crate) struct Backoff {
    delay: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Current delay, doubling for the next failure
    pub(crate) fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = std::cmp::min(self.delay * 2, self.max_delay);
        current
    }

    /// Reset after a healthy run
    pub(crate) fn reset(&mut self) {
        self.delay = Duration::from_secs(1);
    }
}

/// Sleep in short slices so a stopping producer stays responsive
pub(crate) fn interruptible_sleep(
    total: Duration,
    running: &std::sync::atomic::AtomicBool,
) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(std::sync::atomic::Ordering::SeqCst) {
        let step = std::cmp::min(remaining, slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
