//! Bridge from the agent's line stream into the store and live sinks
//!
//! Consumes line-delimited event JSON from any buffered reader (the agent's
//! stdout in production, in-memory buffers in tests). Each parsed event is
//! published to live subscribers best-effort and persisted through an
//! `EventSink` with bounded retries. When the sink stays down, events queue
//! in a bounded overflow buffer that evicts its oldest entry on overflow,
//! and the buffer is flushed in arrival order once the sink recovers.
//! Malformed lines are counted and skipped; one bad line never stops the
//! stream.

pub mod live;

use crate::error::TransportError;
use crate::events::SecurityEvent;
use crate::health::HealthMonitor;
use crate::store::EventSink;
use live::LiveHub;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

/// Consumer of the agent's event stream
pub struct Bridge<'a> {
    sink: &'a dyn EventSink,
    live: &'a LiveHub,
    health: Arc<HealthMonitor>,
    insert_attempts: u32,
    insert_backoff: Duration,
    overflow: VecDeque<SecurityEvent>,
    overflow_capacity: usize,
}

impl<'a> Bridge<'a> {
    pub fn new(
        sink: &'a dyn EventSink,
        live: &'a LiveHub,
        health: Arc<HealthMonitor>,
        insert_attempts: u32,
        insert_backoff: Duration,
        overflow_capacity: usize,
    ) -> Self {
        Self {
            sink,
            live,
            health,
            insert_attempts,
            insert_backoff,
            overflow: VecDeque::new(),
            overflow_capacity,
        }
    }

    /// Consume the stream until it closes, then drain the overflow buffer
    ///
    /// Returns the number of events handed to the sink or buffered; events
    /// still in the overflow buffer at shutdown are reported and lost.
    pub fn run<R: BufRead>(&mut self, reader: R) -> Result<u64, TransportError> {
        let mut consumed = 0u64;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let event = match SecurityEvent::from_json(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("{}", TransportError::ParseError(e.to_string()));
                    self.health.record_parse_failure();
                    continue;
                }
            };

            // Live delivery never waits on persistence
            self.live.publish(&event);
            self.persist(event);
            consumed += 1;
        }

        info!("Event stream closed after {} events", consumed);
        self.flush_overflow();
        if !self.overflow.is_empty() {
            warn!(
                "Shutting down with {} unpersisted events in the overflow buffer",
                self.overflow.len()
            );
        }
        Ok(consumed)
    }

    /// Persist one event, draining any backlog first so arrival order is
    /// preserved across sink outages
    fn persist(&mut self, event: SecurityEvent) {
        self.flush_overflow();
        if !self.overflow.is_empty() {
            // Sink still down; the new event goes behind the backlog
            self.buffer(event);
            return;
        }

        if let Some(event) = self.try_insert(event) {
            self.buffer(event);
        } else {
            self.health.set_store_degraded(false);
        }
    }

    /// Attempt the bounded retry sequence; gives the event back on failure
    fn try_insert(&self, event: SecurityEvent) -> Option<SecurityEvent> {
        let mut backoff = self.insert_backoff;
        for attempt in 1..=self.insert_attempts {
            match self.sink.persist(&event) {
                Ok(()) => return None,
                Err(e) => {
                    debug!(
                        "Store insert attempt {}/{} failed: {}",
                        attempt, self.insert_attempts, e
                    );
                    if attempt < self.insert_attempts {
                        std::thread::sleep(backoff);
                        backoff *= 2;
                    }
                }
            }
        }
        warn!("Store insert retries exhausted, buffering event");
        self.health.set_store_degraded(true);
        Some(event)
    }

    /// Push onto the overflow buffer, evicting the oldest entry when full
    fn buffer(&mut self, event: SecurityEvent) {
        if self.overflow.len() >= self.overflow_capacity {
            self.overflow.pop_front();
            self.health.record_overflow_drop();
        }
        self.overflow.push_back(event);
    }

    /// Replay buffered events oldest-first, stopping at the first failure
    fn flush_overflow(&mut self) {
        while let Some(event) = self.overflow.front() {
            // Single attempt per flush step; retries apply to fresh events,
            // not replays
            if self.sink.persist(event).is_err() {
                return;
            }
            self.overflow.pop_front();
        }
        if self.overflow.is_empty() && self.health.is_store_degraded() {
            info!("Store recovered, overflow buffer drained");
            self.health.set_store_degraded(false);
        }
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }
}
