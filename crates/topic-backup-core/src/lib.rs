//! Topic Backup Core Library
//!
//! This crate implements the backup format engine for partitioned log
//! topics: the V3 metadata and data file formats, readers for the legacy
//! V1/V2 formats, file- and record-level verification, and the engines that
//! move records between a cluster and a backup.

pub mod backup;
pub mod checksum;
pub mod cluster;
mod codec;
pub mod config;
pub mod datafile;
pub mod error;
pub mod inspect;
pub mod kafka;
pub mod layout;
pub mod legacy;
pub mod metadata;
pub mod record;
pub mod restore;
pub mod verify;
pub mod version;

pub use backup::{BackupEngine, BackupReport};
pub use checksum::{ChecksumAlgorithm, ChecksumRegistry, RunningChecksum, Xxh3_64Be};
pub use cluster::{ClusterSink, ClusterSource, FetchBatch, MemoryCluster, TopicDescription};
pub use config::{BackupOptions, Config, KafkaConfig, RestoreOptions};
pub use datafile::{DataFileReader, DataFileWriter, DataFileWriterConfig};
pub use error::{Error, KafkaError, Result};
pub use inspect::{inspect, Inspection, InspectOutput};
pub use kafka::KafkaCluster;
pub use metadata::{read_metadata, write_metadata, BackupMetadata, DataFileDescriptor};
pub use record::{Record, RecordHeader, TimestampType};
pub use restore::{RestoreEngine, RestoreReport};
pub use verify::{FileVerdict, VerificationReport, Verifier, VerifyLevel};
pub use version::{sniff_version, BackupVersion};
