//! Backup engine orchestration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::checksum::{ChecksumAlgorithm, ChecksumRegistry, DEFAULT_ALGORITHM};
use crate::cluster::ClusterSource;
use crate::config::BackupOptions;
use crate::datafile::{DataFileWriter, DataFileWriterConfig};
use crate::error::KafkaError;
use crate::layout::{data_file_name, metadata_file_name, topic_directory};
use crate::legacy::V2Writer;
use crate::metadata::{
    utc_now_millis, write_metadata_file, BackupMetadata, DataFileDescriptor, TOOL_NAME,
    TOOL_VERSION,
};
use crate::record::Record;
use crate::version::BackupVersion;
use crate::{Error, Result};

/// Summary of a finished backup
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub topic: String,
    pub version: BackupVersion,
    /// Metadata file (V3) or backup file (V2)
    pub location: PathBuf,
    pub partitions_backed_up: usize,
    pub records: u64,
    pub elapsed: Duration,
}

/// Backup engine for a single topic
pub struct BackupEngine {
    source: Arc<dyn ClusterSource>,
    registry: Arc<ChecksumRegistry>,
    options: BackupOptions,
    algorithm_id: String,
}

impl BackupEngine {
    /// Create a backup engine writing checksums with the default algorithm
    pub fn new(
        source: Arc<dyn ClusterSource>,
        registry: Arc<ChecksumRegistry>,
        options: BackupOptions,
    ) -> Self {
        Self {
            source,
            registry,
            options,
            algorithm_id: DEFAULT_ALGORITHM.to_string(),
        }
    }

    /// Use another registered checksum algorithm
    pub fn with_algorithm(mut self, algorithm_id: impl Into<String>) -> Self {
        self.algorithm_id = algorithm_id.into();
        self
    }

    /// Back up `topic` into `destination/topic-<topic>/` using format V3.
    ///
    /// Every partition is copied up to the latest offset observed when the
    /// backup started. On failure the data files already written are removed.
    pub async fn backup(&self, topic: &str, destination: &Path) -> Result<BackupReport> {
        let started = Instant::now();
        let algorithm = self.registry.get(&self.algorithm_id)?;

        let directory = topic_directory(destination, topic);
        let metadata_path = directory.join(metadata_file_name(topic));
        if metadata_path.exists() {
            return Err(Error::BackupExists(metadata_path));
        }

        let description = self.source.describe_topic(topic).await?;
        info!(
            "Backing up topic {} ({} partitions) to {}",
            topic,
            description.partition_count,
            directory.display()
        );

        let started_at = utc_now_millis();

        // Snapshot the end offsets first so every partition stops at the same moment
        let mut ranges = Vec::new();
        for partition in 0..description.partition_count {
            let (earliest, latest) = self.source.watermarks(topic, partition).await?;
            if earliest >= latest {
                debug!("{}:{}: no data to back up", topic, partition);
                continue;
            }
            debug!(
                "Snapshot target: {}:{} -> offsets {}..{} ({} records available)",
                topic,
                partition,
                earliest,
                latest,
                latest - earliest
            );
            ranges.push((partition, earliest, latest));
        }

        let created_directory = !directory.exists();
        fs::create_dir_all(&directory)?;

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_partitions));
        let mut handles = Vec::with_capacity(ranges.len());
        for (partition, start, end) in ranges {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;

            let ctx = BackupPartitionContext {
                source: Arc::clone(&self.source),
                algorithm: Arc::clone(&algorithm),
                topic: topic.to_string(),
                partition,
                directory: directory.clone(),
                start_offset: start,
                end_offset: end,
                fetch_max_bytes: self.options.fetch_max_bytes,
                writer_config: DataFileWriterConfig {
                    checkpoint_interval: self.options.checkpoint_interval,
                },
            };

            handles.push(tokio::spawn(async move {
                let result = ctx.backup_partition().await;
                drop(permit);
                (partition, result)
            }));
        }

        let mut data_files = Vec::new();
        let mut first_error = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((_, Ok(Some(descriptor)))) => data_files.push(descriptor),
                Ok((_, Ok(None))) => {}
                Ok((partition, Err(e))) => {
                    error!("Error backing up {}:{}: {}", topic, partition, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Task join error: {}", e);
                    first_error.get_or_insert(Error::Io(std::io::Error::other(e)));
                }
            }
        }

        if let Some(e) = first_error {
            remove_data_files(&directory, &data_files);
            if created_directory {
                remove_empty_directory(&directory);
            }
            return Err(e);
        }

        data_files.sort_by_key(|d| d.partition);

        let metadata = BackupMetadata {
            tool_name: TOOL_NAME.to_string(),
            tool_version: TOOL_VERSION.to_string(),
            started_at,
            finished_at: utc_now_millis().max(started_at),
            topic_name: topic.to_string(),
            topic_id: description.topic_id.clone(),
            partition_count: description.partition_count,
            checksum_algorithm: algorithm.id().to_string(),
            data_files,
        };

        if let Err(e) = write_metadata_file(&metadata_path, &metadata) {
            remove_data_files(&directory, &metadata.data_files);
            if created_directory {
                remove_empty_directory(&directory);
            }
            return Err(e);
        }

        let report = BackupReport {
            topic: topic.to_string(),
            version: BackupVersion::V3,
            location: metadata_path,
            partitions_backed_up: metadata.data_files.len(),
            records: metadata.total_records(),
            elapsed: started.elapsed(),
        };

        info!(
            "Backup of {} completed: {} records in {} data files ({:?})",
            topic, report.records, report.partitions_backed_up, report.elapsed
        );

        Ok(report)
    }

    /// Back up a single-partition `topic` into the V2 file `path`.
    pub async fn backup_legacy(&self, topic: &str, path: &Path) -> Result<BackupReport> {
        let started = Instant::now();

        let description = self.source.describe_topic(topic).await?;
        if description.partition_count != 1 {
            return Err(Error::PartitionCount {
                topic: topic.to_string(),
                expected: 1,
                found: description.partition_count,
            });
        }

        let mut writer = V2Writer::create(path)?;
        let (earliest, latest) = self.source.watermarks(topic, 0).await?;
        info!(
            "Backing up topic {} to V2 file {} ({} records available)",
            topic,
            path.display(),
            (latest - earliest).max(0)
        );

        fetch_range(
            self.source.as_ref(),
            topic,
            0,
            earliest,
            latest,
            self.options.fetch_max_bytes,
            |record| writer.append(record.key.as_deref(), record.value.as_deref()),
        )
        .await?;

        if writer.record_count() > 0 {
            warn!("V2 backups drop headers, timestamps and offsets; use the V3 format to keep them");
        }
        let records = writer.finalize()?;

        Ok(BackupReport {
            topic: topic.to_string(),
            version: BackupVersion::V2,
            location: path.to_path_buf(),
            partitions_backed_up: 1,
            records,
            elapsed: started.elapsed(),
        })
    }
}

/// Context for backing up a single partition
struct BackupPartitionContext {
    source: Arc<dyn ClusterSource>,
    algorithm: Arc<dyn ChecksumAlgorithm>,
    topic: String,
    partition: i32,
    directory: PathBuf,
    start_offset: i64,
    /// Exclusive
    end_offset: i64,
    fetch_max_bytes: i32,
    writer_config: DataFileWriterConfig,
}

impl BackupPartitionContext {
    /// `None` when the range held no data records, e.g. only control batches
    async fn backup_partition(self) -> Result<Option<DataFileDescriptor>> {
        debug!(
            "Starting backup of {}:{} ({}..{})",
            self.topic, self.partition, self.start_offset, self.end_offset
        );

        let mut writer = DataFileWriter::create(
            &self.directory,
            &data_file_name(&self.topic, self.partition),
            self.partition,
            self.algorithm.as_ref(),
            self.writer_config.clone(),
        )?;

        let fetched = fetch_range(
            self.source.as_ref(),
            &self.topic,
            self.partition,
            self.start_offset,
            self.end_offset,
            self.fetch_max_bytes,
            |record| writer.append(record),
        )
        .await?;

        if fetched == 0 {
            debug!(
                "{}:{}: no records fetched from {}..{}, skipping data file",
                self.topic, self.partition, self.start_offset, self.end_offset
            );
            return Ok(None);
        }
        writer.finalize().map(Some)
    }
}

/// Feed every record in `[start, end)` of a partition to `consume`
async fn fetch_range<F>(
    source: &dyn ClusterSource,
    topic: &str,
    partition: i32,
    start: i64,
    end: i64,
    max_bytes: i32,
    mut consume: F,
) -> Result<u64>
where
    F: FnMut(&Record) -> Result<()>,
{
    let mut current = start;
    let mut count = 0u64;

    while current < end {
        let batch = source.fetch(topic, partition, current, max_bytes).await?;

        for record in batch
            .records
            .iter()
            .filter(|r| r.offset >= current && r.offset < end)
        {
            consume(record)?;
            count += 1;
        }

        if batch.next_offset <= current {
            return Err(KafkaError::Protocol(format!(
                "Fetch for {}:{} made no progress at offset {}",
                topic, partition, current
            ))
            .into());
        }
        current = batch.next_offset;
    }

    debug!("{}:{}: read {} records", topic, partition, count);
    Ok(count)
}

fn remove_data_files(directory: &Path, data_files: &[DataFileDescriptor]) {
    for descriptor in data_files {
        let path = directory.join(&descriptor.filename);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Remove a directory this run created; left alone if anything remains in it
fn remove_empty_directory(directory: &Path) {
    if let Err(e) = fs::remove_dir(directory) {
        debug!("Leaving {} in place: {}", directory.display(), e);
    }
}
