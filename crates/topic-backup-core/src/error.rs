//! Error types for the topic backup core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::version::BackupVersion;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the topic backup library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka protocol error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparsable on-disk structure
    #[error("FormatError: {0}")]
    Format(String),

    /// End of file reached in the middle of a data file
    #[error("TruncatedRecord: {detail} (after {record_index} records)")]
    TruncatedRecord { record_index: u64, detail: String },

    /// Digest mismatch
    #[error("InvalidChecksum: {0}")]
    InvalidChecksum(String),

    /// Checksum algorithm identifier not known to this build
    #[error("UnsupportedAlgorithm: unknown checksum algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// Operation that is only defined for V3 backups
    #[error("Only backups using format V3 can be {operation}, found {found}.")]
    UnsupportedLegacyOperation {
        operation: &'static str,
        found: BackupVersion,
    },

    /// Record rejected by a data file writer
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Topic has an unexpected number of partitions
    #[error("Topic {topic} has {found} partitions, expected {expected}")]
    PartitionCount {
        topic: String,
        expected: i32,
        found: i32,
    },

    /// Topic not found
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Backup already present at the destination
    #[error("Backup already exists: {}", .0.display())]
    BackupExists(PathBuf),
}

/// Kafka-specific errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KafkaError {
    /// Connection failed
    #[error("Failed to connect to broker {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker error response
    #[error("Broker returned error code {code}: {message}")]
    BrokerError { code: i16, message: String },

    /// No available brokers
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Partition not available
    #[error("Partition {partition} not available for topic {topic}")]
    PartitionNotAvailable { topic: String, partition: i32 },
}

impl Error {
    /// Shorthand for a [`Error::Format`] error.
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    /// True for the conditions that mean "cannot verify" rather than "corrupt".
    pub fn is_unsupported_algorithm(&self) -> bool {
        matches!(self, Error::UnsupportedAlgorithm(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}
