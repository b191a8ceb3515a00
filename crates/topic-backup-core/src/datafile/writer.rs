//! Data file writer with running checksum and periodic checkpoints.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::format::{
    encode_end, encode_frame, encode_record, CheckpointPayload, DataFileHeader, FrameKind,
};
use crate::checksum::{ChecksumAlgorithm, RunningChecksum};
use crate::metadata::DataFileDescriptor;
use crate::record::Record;
use crate::{Error, Result};

/// Default number of records between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: u32 = 1000;

/// Configuration for data file writer
#[derive(Debug, Clone)]
pub struct DataFileWriterConfig {
    /// Records between checkpoints (0 = never)
    pub checkpoint_interval: u32,
}

impl Default for DataFileWriterConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// Streams one partition's records into a data file.
///
/// Bytes go to a temporary file next to the destination. [`finalize`]
/// moves it into place; dropping the writer without finalizing discards it.
///
/// [`finalize`]: DataFileWriter::finalize
pub struct DataFileWriter {
    config: DataFileWriterConfig,
    path: PathBuf,
    filename: String,
    partition: i32,
    output: BufWriter<NamedTempFile>,
    running: Box<dyn RunningChecksum>,

    /// Records appended so far
    record_count: u64,
    /// First offset appended
    start_offset: Option<i64>,
    /// Last offset appended
    end_offset: Option<i64>,
    /// Checkpoints emitted so far
    checkpoints: u64,
}

impl DataFileWriter {
    /// Create a writer for `dir/filename`.
    ///
    /// Fails if the destination already exists.
    pub fn create(
        dir: &Path,
        filename: &str,
        partition: i32,
        algorithm: &dyn ChecksumAlgorithm,
        config: DataFileWriterConfig,
    ) -> Result<Self> {
        if partition < 0 {
            return Err(Error::InvalidRecord(format!(
                "cannot write data file for negative partition {}",
                partition
            )));
        }

        let path = dir.join(filename);
        if path.exists() {
            return Err(Error::BackupExists(path));
        }

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", filename))
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let mut writer = Self {
            path,
            filename: filename.to_string(),
            partition,
            output: BufWriter::new(temp),
            running: algorithm.running(),
            record_count: 0,
            start_offset: None,
            end_offset: None,
            checkpoints: 0,
            config,
        };

        let header = DataFileHeader::new(partition, writer.config.checkpoint_interval);
        writer.write_bytes(&header.to_bytes())?;
        Ok(writer)
    }

    /// Destination path once finalized
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partition this file holds
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Checkpoints emitted so far
    pub fn checkpoint_count(&self) -> u64 {
        self.checkpoints
    }

    /// Append a record.
    ///
    /// Offsets must be non-decreasing and the record must belong to this
    /// writer's partition.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        if record.partition != self.partition {
            return Err(Error::InvalidRecord(format!(
                "record from partition {} written to data file for partition {}",
                record.partition, self.partition
            )));
        }
        if let Some(last) = self.end_offset {
            if record.offset < last {
                return Err(Error::InvalidRecord(format!(
                    "offset {} appended after offset {} in {}",
                    record.offset, last, self.filename
                )));
            }
        }

        let payload = encode_record(record)?;
        let frame = encode_frame(FrameKind::Record, &payload)?;
        self.write_bytes(&frame)?;

        if self.start_offset.is_none() {
            self.start_offset = Some(record.offset);
        }
        self.end_offset = Some(record.offset);
        self.record_count += 1;

        let interval = u64::from(self.config.checkpoint_interval);
        if interval > 0 && self.record_count % interval == 0 {
            self.write_checkpoint()?;
        }
        Ok(())
    }

    fn write_checkpoint(&mut self) -> Result<()> {
        let checkpoint = CheckpointPayload {
            record_index: self.record_count,
            state: self.running.digest(),
        };
        let frame = encode_frame(FrameKind::Checkpoint, &checkpoint.to_bytes()?)?;
        self.write_bytes(&frame)?;
        self.checkpoints += 1;
        debug!(
            "Checkpoint in {} after {} records",
            self.filename, self.record_count
        );
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.output.write_all(data)?;
        self.running.update(data);
        Ok(())
    }

    /// Write the END frame, sync, and move the file into place.
    pub fn finalize(mut self) -> Result<DataFileDescriptor> {
        let frame = encode_frame(FrameKind::End, &encode_end(self.record_count))?;
        self.write_bytes(&frame)?;

        let temp = self
            .output
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&self.path)?;

        let checksum = self.running.digest();
        let descriptor = DataFileDescriptor {
            filename: self.filename,
            partition: self.partition,
            checksum,
            record_count: self.record_count,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        };

        info!(
            "Wrote data file {} with {} records ({} checkpoints, checksum {})",
            descriptor.filename,
            descriptor.record_count,
            self.checkpoints,
            descriptor.checksum_hex()
        );

        Ok(descriptor)
    }
}
