//! Configuration management
//!
//! Configuration is loaded from an optional TOML file; every section has
//! safe defaults so a missing or invalid file degrades to a working agent.
//! The watch root and storage location can additionally be overridden via
//! `WARDEN_WATCH_PATH` and `WARDEN_DB_PATH` at process start; nothing else
//! is runtime-mutable.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub process: ProcessConfig,
    pub network: NetworkConfig,
    pub syslog: SyslogConfig,
    pub pipeline: PipelineConfig,
    pub bridge: BridgeConfig,
    pub storage: StorageConfig,
}

/// File-integrity watcher settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Root path watched recursively for filesystem changes
    pub root: PathBuf,
    /// Files larger than this are reported without a content hash
    pub hash_size_ceiling_bytes: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/etc"),
            hash_size_ceiling_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Process sampler settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub interval_seconds: u64,
    /// Processes below both floors are not reported individually
    pub min_cpu_percent: f32,
    pub min_memory_bytes: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            min_cpu_percent: 1.0,
            min_memory_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Network socket sampler settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub interval_seconds: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
        }
    }
}

/// System log tailer settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyslogConfig {
    pub path: PathBuf,
    pub poll_interval_millis: u64,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/syslog"),
            poll_interval_millis: 500,
        }
    }
}

/// Producer-to-collector queue settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded queue capacity between producers and the collector
    pub queue_capacity: usize,
    /// How long a producer blocks on a full queue before flagging overflow
    pub send_timeout_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            send_timeout_millis: 5000,
        }
    }
}

/// Bridge fan-out settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Events held in memory while the store is failing
    pub overflow_capacity: usize,
    /// Insert attempts before an event goes to the overflow buffer
    pub insert_attempts: u32,
    /// Initial backoff between insert attempts, doubled per retry
    pub insert_backoff_millis: u64,
    /// Per-subscriber live channel capacity
    pub subscriber_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            overflow_capacity: 512,
            insert_attempts: 3,
            insert_backoff_millis: 50,
            subscriber_capacity: 256,
        }
    }
}

/// Event store settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("warden.db"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read and
    /// `ConfigError::TomlError` if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from an optional file, falling back to defaults on any failure
    ///
    /// Missing or invalid files are reported via the log and never fatal;
    /// the agent always starts with a usable configuration.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                match Self::from_file(path) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(e)) => {
                        log::warn!("Configuration file unreadable ({}), using defaults", e);
                        Config::default()
                    }
                    Err(e) => {
                        log::error!("Configuration error in '{}': {}", path.display(), e);
                        log::warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Apply the two supported environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("WARDEN_WATCH_PATH") {
            self.watch.root = PathBuf::from(root);
        }
        if let Ok(db) = std::env::var("WARDEN_DB_PATH") {
            self.storage.db_path = PathBuf::from(db);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.bridge.overflow_capacity, 512);
        assert_eq!(config.process.interval_seconds, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[watch]\nroot = \"/tmp/watched\"\n\n[pipeline]\nqueue_capacity = 64"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.watch.root, PathBuf::from("/tmp/watched"));
        assert_eq!(config.pipeline.queue_capacity, 64);
        // Untouched sections keep defaults
        assert_eq!(config.network.interval_seconds, 5);
        assert_eq!(config.watch.hash_size_ceiling_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let config = Config::load(Some(file.path()));
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/warden.toml")));
        assert_eq!(config.storage, StorageConfig::default());
    }
}
