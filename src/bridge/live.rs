//! Live event fan-out
//!
//! Fire-and-forget delivery of stored events to in-process subscribers.
//! Each subscriber owns a bounded channel; a slow or departed subscriber
//! loses events rather than slowing down ingestion.

use crate::events::SecurityEvent;
use log::{debug, info};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

struct Subscriber {
    name: String,
    sender: SyncSender<SecurityEvent>,
}

/// Hub distributing events to live subscribers on a best-effort basis
pub struct LiveHub {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LiveHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a named subscriber and return its event stream
    pub fn subscribe(&self, name: &str) -> Receiver<SecurityEvent> {
        let (sender, receiver) = sync_channel(self.capacity);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push(Subscriber {
            name: name.to_string(),
            sender,
        });
        info!("Live subscriber '{}' registered", name);
        receiver
    }

    /// Deliver an event to every subscriber that has room
    ///
    /// A full subscriber channel drops the event for that subscriber only;
    /// a disconnected subscriber is pruned.
    pub fn publish(&self, event: &SecurityEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Live subscriber '{}' is full, dropping event", sub.name);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                info!("Live subscriber '{}' disconnected, removing", sub.name);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
