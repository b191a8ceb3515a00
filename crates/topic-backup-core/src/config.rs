//! Configuration structures for backup and restore operations.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::datafile::DEFAULT_CHECKPOINT_INTERVAL;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Kafka cluster connection
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Backup-specific options
    #[serde(default)]
    pub backup: BackupOptions,

    /// Restore-specific options
    #[serde(default)]
    pub restore: RestoreOptions,
}

/// Kafka cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,

    /// Client id sent with every request
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Per-request timeout in milliseconds (default: 30000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Replication factor for topics created on restore (-1 = broker default)
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i16,

    /// Connection attempts per broker before giving up (default: 3)
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Pause between connection attempts in milliseconds (default: 1000)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            request_timeout_ms: default_request_timeout_ms(),
            replication_factor: default_replication_factor(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "topic-backup".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_replication_factor() -> i16 {
    -1
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Backup options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Records between data file checkpoints (default: 1000, 0 = never)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Partitions backed up concurrently (default: 4)
    #[serde(default = "default_max_concurrent_partitions")]
    pub max_concurrent_partitions: usize,

    /// Maximum bytes per fetch request (default: 1 MiB)
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            max_concurrent_partitions: default_max_concurrent_partitions(),
            fetch_max_bytes: default_fetch_max_bytes(),
        }
    }
}

fn default_checkpoint_interval() -> u32 {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_max_concurrent_partitions() -> usize {
    4
}

fn default_fetch_max_bytes() -> i32 {
    1024 * 1024
}

/// Restore options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Records per produce request (default: 500)
    #[serde(default = "default_produce_batch_size")]
    pub produce_batch_size: usize,

    /// Partitions restored concurrently (default: 4)
    #[serde(default = "default_max_concurrent_partitions")]
    pub max_concurrent_partitions: usize,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            produce_batch_size: default_produce_batch_size(),
            max_concurrent_partitions: default_max_concurrent_partitions(),
        }
    }
}

fn default_produce_batch_size() -> usize {
    500
}

impl Config {
    /// Load a YAML (or JSON) configuration file and validate it
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server is required".to_string(),
            ));
        }
        if self.kafka.replication_factor == 0 || self.kafka.replication_factor < -1 {
            return Err(crate::Error::Config(format!(
                "Invalid replication_factor: {}",
                self.kafka.replication_factor
            )));
        }
        if self.backup.max_concurrent_partitions == 0 {
            return Err(crate::Error::Config(
                "backup.max_concurrent_partitions must be > 0".to_string(),
            ));
        }
        if self.backup.fetch_max_bytes <= 0 {
            return Err(crate::Error::Config(
                "backup.fetch_max_bytes must be > 0".to_string(),
            ));
        }

        self.restore.validate()
    }
}

impl RestoreOptions {
    /// Validate restore options
    pub fn validate(&self) -> crate::Result<()> {
        if self.produce_batch_size == 0 {
            return Err(crate::Error::Config(
                "restore.produce_batch_size must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_partitions == 0 {
            return Err(crate::Error::Config(
                "restore.max_concurrent_partitions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
