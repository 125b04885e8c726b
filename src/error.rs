use thiserror::Error;

/// Errors that can occur in event producers
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to establish observation source: {0}")]
    WatchSetup(String),

    #[error("Observation source lost: {0}")]
    WatchLost(String),

    #[error("Failed to sample OS state: {0}")]
    Sample(String),

    #[error("Filesystem watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the collector pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event queue closed")]
    QueueClosed,

    #[error("Event queue full after {0:?}")]
    QueueFull(std::time::Duration),

    #[error("IO error writing event stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur on the bridge's input stream
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to parse event line: {0}")]
    ParseError(String),

    #[error("IO error reading event stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur in the store and query layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode event for storage: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown severity token: {0}")]
    InvalidSeverity(String),
}
