/// Error types for the monitoring pipeline
pub mod error;

/// Event model shared across producers, bridge, and store
pub mod events;

/// Event producers for files, processes, sockets, and logs
pub mod producers;

/// Bounded event queue and serializing collector
pub mod collector;

/// Detection rules applied before events leave the agent
pub mod rules;

/// Bridge from the agent's line stream into the sinks
pub mod bridge;

/// Durable event store and queries
pub mod store;

/// Pipeline health tracking
pub mod health;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, PipelineError, ProducerError, StoreError, TransportError};
pub use events::{EventKind, SecurityEvent, Severity};
