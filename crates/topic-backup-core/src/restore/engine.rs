//! Restore engine orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::checksum::{ChecksumAlgorithm, ChecksumRegistry};
use crate::cluster::ClusterSink;
use crate::config::RestoreOptions;
use crate::datafile::DataFileReader;
use crate::layout::{data_directory, resolve_location};
use crate::legacy::read_legacy;
use crate::metadata::{read_metadata, DataFileDescriptor};
use crate::record::Record;
use crate::verify::FULL_FILE_MISMATCH;
use crate::version::{sniff_version, BackupVersion};
use crate::{Error, Result};

/// Per-partition restore summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRestoreReport {
    pub partition: i32,
    pub records: u64,
}

/// Summary of a finished restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub target_topic: String,
    pub version: BackupVersion,
    pub partitions: Vec<PartitionRestoreReport>,
    pub elapsed: Duration,
}

impl RestoreReport {
    pub fn total_records(&self) -> u64 {
        self.partitions.iter().map(|p| p.records).sum()
    }
}

/// Restore engine for a single backup
pub struct RestoreEngine {
    sink: Arc<dyn ClusterSink>,
    registry: Arc<ChecksumRegistry>,
    options: RestoreOptions,
}

impl RestoreEngine {
    pub fn new(
        sink: Arc<dyn ClusterSink>,
        registry: Arc<ChecksumRegistry>,
        options: RestoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            sink,
            registry,
            options,
        })
    }

    /// Restore the backup at `location` into `target_topic`.
    ///
    /// `location` is a metadata file, a backup directory, or a V1/V2 file.
    pub async fn restore(&self, location: &Path, target_topic: &str) -> Result<RestoreReport> {
        let path = resolve_location(location)?;
        let version = sniff_version(&path)?;
        info!(
            "Restoring {} backup {} into topic {}",
            version,
            path.display(),
            target_topic
        );

        match version {
            BackupVersion::V3 => self.restore_v3(&path, target_topic).await,
            BackupVersion::V1 | BackupVersion::V2 => {
                self.restore_legacy(&path, target_topic).await
            }
        }
    }

    async fn restore_v3(&self, metadata_path: &Path, target_topic: &str) -> Result<RestoreReport> {
        let started = Instant::now();
        let metadata = read_metadata(metadata_path)?;
        let algorithm = self.registry.get(&metadata.checksum_algorithm)?;

        self.sink
            .ensure_topic(target_topic, metadata.partition_count)
            .await?;
        let found = self.sink.partition_count(target_topic).await?;
        if found < metadata.partition_count {
            return Err(Error::PartitionCount {
                topic: target_topic.to_string(),
                expected: metadata.partition_count,
                found,
            });
        }

        let directory = data_directory(metadata_path);
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_partitions));
        let mut handles = Vec::new();

        for descriptor in &metadata.data_files {
            if descriptor.record_count == 0 {
                debug!("Skipping empty data file {}", descriptor.filename);
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;

            let ctx = RestorePartitionContext {
                sink: Arc::clone(&self.sink),
                algorithm: Arc::clone(&algorithm),
                target_topic: target_topic.to_string(),
                path: directory.join(&descriptor.filename),
                descriptor: descriptor.clone(),
                batch_size: self.options.produce_batch_size,
            };

            handles.push(tokio::spawn(async move {
                let result = ctx.restore_partition().await;
                drop(permit);
                result
            }));
        }

        let mut partitions = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(report)) => partitions.push(report),
                Ok(Err(e)) => {
                    error!("Error restoring into {}: {}", target_topic, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Task join error: {}", e);
                    return Err(Error::Io(std::io::Error::other(e)));
                }
            }
        }
        partitions.sort_by_key(|p| p.partition);

        let report = RestoreReport {
            target_topic: target_topic.to_string(),
            version: BackupVersion::V3,
            partitions,
            elapsed: started.elapsed(),
        };
        info!(
            "Restore into {} completed: {} records across {} partitions ({:?})",
            target_topic,
            report.total_records(),
            report.partitions.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Legacy backups hold one partition and no timestamps; records are
    /// stamped with the current time.
    async fn restore_legacy(&self, path: &Path, target_topic: &str) -> Result<RestoreReport> {
        let started = Instant::now();
        let (version, legacy_records) = read_legacy(path)?;

        self.sink.ensure_topic(target_topic, 1).await?;
        let found = self.sink.partition_count(target_topic).await?;
        if found != 1 {
            return Err(Error::PartitionCount {
                topic: target_topic.to_string(),
                expected: 1,
                found,
            });
        }

        let timestamp = Utc::now().timestamp_millis();
        let records: Vec<Record> = legacy_records
            .into_iter()
            .enumerate()
            .map(|(i, r)| Record::new(0, i as i64, r.key, r.value, timestamp))
            .collect();

        for batch in records.chunks(self.options.produce_batch_size) {
            self.sink.produce(target_topic, 0, batch).await?;
        }

        info!(
            "Restored {} records from {} backup into {}:0",
            records.len(),
            version,
            target_topic
        );

        Ok(RestoreReport {
            target_topic: target_topic.to_string(),
            version,
            partitions: vec![PartitionRestoreReport {
                partition: 0,
                records: records.len() as u64,
            }],
            elapsed: started.elapsed(),
        })
    }
}

/// Context for restoring one data file
struct RestorePartitionContext {
    sink: Arc<dyn ClusterSink>,
    algorithm: Arc<dyn ChecksumAlgorithm>,
    target_topic: String,
    path: PathBuf,
    descriptor: DataFileDescriptor,
    batch_size: usize,
}

impl RestorePartitionContext {
    async fn restore_partition(self) -> Result<PartitionRestoreReport> {
        let partition = self.descriptor.partition;
        debug!(
            "Restoring {} -> {}:{}",
            self.descriptor.filename, self.target_topic, partition
        );

        let mut reader = DataFileReader::open(&self.path, self.algorithm.as_ref())?;
        if reader.header_partition() != partition {
            return Err(Error::format(format!(
                "{} holds partition {}, metadata says {}",
                self.descriptor.filename,
                reader.header_partition(),
                partition
            )));
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            let record = reader.next().transpose()?;
            let done = record.is_none();
            if let Some(record) = record {
                batch.push(record);
            }
            if batch.len() >= self.batch_size || (done && !batch.is_empty()) {
                self.sink
                    .produce(&self.target_topic, partition, &batch)
                    .await?;
                batch.clear();
            }
            if done {
                break;
            }
        }

        if reader.records_read() != self.descriptor.record_count {
            return Err(Error::format(format!(
                "{} holds {} records, metadata says {}",
                self.descriptor.filename,
                reader.records_read(),
                self.descriptor.record_count
            )));
        }

        let digest = reader.digest();
        if digest != self.descriptor.checksum {
            return Err(Error::InvalidChecksum(format!(
                "{} (expected {}, computed {}): {}",
                self.descriptor.filename,
                self.descriptor.checksum_hex(),
                hex::encode(&digest),
                FULL_FILE_MISMATCH
            )));
        }

        info!(
            "Restored {} -> {}:{} ({} records)",
            self.descriptor.filename,
            self.target_topic,
            partition,
            reader.records_read()
        );

        Ok(PartitionRestoreReport {
            partition,
            records: reader.records_read(),
        })
    }
}
