//! V3 backup metadata and its binary codec.
//!
//! Metadata File Format:
//! ```text
//! +-------------------------+
//! | marker "/V3\n"          |
//! | body_len: u32           |
//! | body                    |
//! | crc32: u32              |
//! | magic_end "KBME"        |
//! +-------------------------+
//! ```
//!
//! Body (all integers little-endian, `str` is a u16 length + UTF-8, `opt` is
//! a u8 presence flag + value):
//! - tool_name: str
//! - tool_version: str
//! - started_at: i64 (epoch milliseconds)
//! - finished_at: i64 (epoch milliseconds)
//! - topic_name: str
//! - topic_id: opt str
//! - partition_count: i32
//! - checksum_algorithm: str
//! - data_file_count: u32
//! - data files, each:
//!   - filename: str
//!   - partition: i32
//!   - checksum: u16 length + digest bytes
//!   - record_count: u64
//!   - start_offset: opt i64
//!   - end_offset: opt i64
//!
//! The CRC32 covers everything before it, so a partially written file is
//! never accepted.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec::{put_str, ByteReader};
use crate::version::{sniff_version, BackupVersion, V3_MARKER};
use crate::{Error, Result};

/// Magic bytes closing every metadata file
pub const MAGIC_END: [u8; 4] = *b"KBME";

/// Format version written into every new metadata file
pub const FORMAT_VERSION: u8 = 3;

/// Name recorded as the producing tool
pub const TOOL_NAME: &str = "topic-backup";

/// Version recorded as the producing tool version
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker plus body length
const PREAMBLE_SIZE: usize = 8;

/// CRC plus end magic
const FOOTER_SIZE: usize = 8;

/// Descriptor of one partition's data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileDescriptor {
    /// File name relative to the metadata file's directory
    pub filename: String,

    /// Source partition
    pub partition: i32,

    /// Digest over the entire data file
    pub checksum: Vec<u8>,

    /// Number of records in the file
    pub record_count: u64,

    /// First offset, absent for an empty file
    pub start_offset: Option<i64>,

    /// Last offset, absent for an empty file
    pub end_offset: Option<i64>,
}

impl DataFileDescriptor {
    /// Lower-case hex rendering of the digest
    pub fn checksum_hex(&self) -> String {
        hex::encode(&self.checksum)
    }

    fn validate(&self) -> Result<()> {
        if self.filename.is_empty() || self.filename.contains(['/', '\\']) {
            return Err(Error::format(format!(
                "invalid data file name {:?}",
                self.filename
            )));
        }
        if self.partition < 0 {
            return Err(Error::format(format!(
                "data file {} has negative partition {}",
                self.filename, self.partition
            )));
        }
        match (self.record_count, self.start_offset, self.end_offset) {
            (0, None, None) => Ok(()),
            (0, _, _) => Err(Error::format(format!(
                "data file {} is empty but carries an offset range",
                self.filename
            ))),
            (_, Some(start), Some(end)) if start <= end => Ok(()),
            _ => Err(Error::format(format!(
                "data file {} has an invalid offset range {:?}..{:?}",
                self.filename, self.start_offset, self.end_offset
            ))),
        }
    }
}

/// Descriptive header of a V3 backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// Producing tool
    pub tool_name: String,

    /// Producing tool version
    pub tool_version: String,

    /// Set before the first partition was read
    pub started_at: DateTime<Utc>,

    /// Set after the last partition was finalized
    pub finished_at: DateTime<Utc>,

    /// Source topic
    pub topic_name: String,

    /// Opaque cluster identifier of the source topic
    pub topic_id: Option<String>,

    /// Partition count of the source topic at backup time
    pub partition_count: i32,

    /// Identifier of the algorithm behind every descriptor's checksum.
    ///
    /// Stored verbatim, including identifiers this build does not know.
    pub checksum_algorithm: String,

    /// One entry per partition actually backed up
    pub data_files: Vec<DataFileDescriptor>,
}

impl BackupMetadata {
    /// Format version of this metadata
    pub fn version(&self) -> u8 {
        FORMAT_VERSION
    }

    /// Total records across every data file
    pub fn total_records(&self) -> u64 {
        self.data_files.iter().map(|d| d.record_count).sum()
    }

    /// Check every structural invariant
    pub fn validate(&self) -> Result<()> {
        if self.topic_name.is_empty() {
            return Err(Error::format("metadata has an empty topic name"));
        }
        if self.partition_count <= 0 {
            return Err(Error::format(format!(
                "metadata has non-positive partition count {}",
                self.partition_count
            )));
        }
        if self.started_at > self.finished_at {
            return Err(Error::format(format!(
                "backup started at {} after it finished at {}",
                self.started_at, self.finished_at
            )));
        }
        if self.data_files.len() > self.partition_count as usize {
            return Err(Error::format(format!(
                "metadata lists {} data files for {} partitions",
                self.data_files.len(),
                self.partition_count
            )));
        }

        let mut filenames = HashSet::new();
        let mut partitions = HashSet::new();
        for descriptor in &self.data_files {
            descriptor.validate()?;
            if descriptor.partition >= self.partition_count {
                return Err(Error::format(format!(
                    "data file {} references partition {} of a {}-partition topic",
                    descriptor.filename, descriptor.partition, self.partition_count
                )));
            }
            if !filenames.insert(descriptor.filename.as_str()) {
                return Err(Error::format(format!(
                    "duplicate data file name {}",
                    descriptor.filename
                )));
            }
            if !partitions.insert(descriptor.partition) {
                return Err(Error::format(format!(
                    "duplicate data file for partition {}",
                    descriptor.partition
                )));
            }
        }
        Ok(())
    }

    /// Serialize to the on-disk representation.
    ///
    /// The output depends only on the field values.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut body = BytesMut::with_capacity(256);
        put_str(&mut body, &self.tool_name)?;
        put_str(&mut body, &self.tool_version)?;
        body.put_i64_le(self.started_at.timestamp_millis());
        body.put_i64_le(self.finished_at.timestamp_millis());
        put_str(&mut body, &self.topic_name)?;
        match &self.topic_id {
            Some(id) => {
                body.put_u8(1);
                put_str(&mut body, id)?;
            }
            None => body.put_u8(0),
        }
        body.put_i32_le(self.partition_count);
        put_str(&mut body, &self.checksum_algorithm)?;

        let count = u32::try_from(self.data_files.len())
            .map_err(|_| Error::format("too many data files"))?;
        body.put_u32_le(count);
        for descriptor in &self.data_files {
            put_str(&mut body, &descriptor.filename)?;
            body.put_i32_le(descriptor.partition);
            let digest_len = u16::try_from(descriptor.checksum.len())
                .map_err(|_| Error::format("checksum digest too long"))?;
            body.put_u16_le(digest_len);
            body.put_slice(&descriptor.checksum);
            body.put_u64_le(descriptor.record_count);
            put_optional_offset(&mut body, descriptor.start_offset);
            put_optional_offset(&mut body, descriptor.end_offset);
        }

        let body_len =
            u32::try_from(body.len()).map_err(|_| Error::format("metadata body too large"))?;
        let mut out = BytesMut::with_capacity(PREAMBLE_SIZE + body.len() + FOOTER_SIZE);
        out.put_slice(&V3_MARKER);
        out.put_u32_le(body_len);
        out.put_slice(&body);

        let crc = crc32(&out);
        out.put_u32_le(crc);
        out.put_slice(&MAGIC_END);
        Ok(out.freeze())
    }

    /// Parse the on-disk representation.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PREAMBLE_SIZE + FOOTER_SIZE {
            return Err(Error::format("metadata file too short"));
        }
        if data[0..4] != V3_MARKER {
            return Err(Error::format("metadata file does not start with the V3 marker"));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[4..8]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;
        let expected_len = PREAMBLE_SIZE
            .checked_add(body_len)
            .and_then(|n| n.checked_add(FOOTER_SIZE));
        if expected_len != Some(data.len()) {
            return Err(Error::format(format!(
                "metadata body length {} does not match file size {}",
                body_len,
                data.len()
            )));
        }

        let footer_start = PREAMBLE_SIZE + body_len;
        if data[footer_start + 4..] != MAGIC_END {
            return Err(Error::format("invalid metadata footer magic"));
        }
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&data[footer_start..footer_start + 4]);
        let stored_crc = u32::from_le_bytes(crc_bytes);
        let computed_crc = crc32(&data[..footer_start]);
        if stored_crc != computed_crc {
            return Err(Error::format(format!(
                "metadata CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        let body = Bytes::copy_from_slice(&data[PREAMBLE_SIZE..footer_start]);
        let mut reader = ByteReader::new(body, "metadata");

        let tool_name = reader.str("tool_name")?;
        let tool_version = reader.str("tool_version")?;
        let started_at = millis_to_datetime(reader.i64("started_at")?)?;
        let finished_at = millis_to_datetime(reader.i64("finished_at")?)?;
        let topic_name = reader.str("topic_name")?;
        let topic_id = if reader.flag("topic_id")? {
            Some(reader.str("topic_id")?)
        } else {
            None
        };
        let partition_count = reader.i32("partition_count")?;
        let checksum_algorithm = reader.str("checksum_algorithm")?;

        let count = reader.u32("data_file_count")? as usize;
        // Each descriptor is at least 25 bytes; cap the allocation accordingly.
        let mut data_files = Vec::with_capacity(count.min(reader.remaining() / 25 + 1));
        for _ in 0..count {
            let filename = reader.str("filename")?;
            let partition = reader.i32("partition")?;
            let digest_len = reader.u16("checksum")? as usize;
            let checksum = reader.bytes(digest_len, "checksum")?.to_vec();
            let record_count = reader.u64("record_count")?;
            let start_offset = read_optional_offset(&mut reader, "start_offset")?;
            let end_offset = read_optional_offset(&mut reader, "end_offset")?;
            data_files.push(DataFileDescriptor {
                filename,
                partition,
                checksum,
                record_count,
                start_offset,
                end_offset,
            });
        }
        reader.finish()?;

        Ok(Self {
            tool_name,
            tool_version,
            started_at,
            finished_at,
            topic_name,
            topic_id,
            partition_count,
            checksum_algorithm,
            data_files,
        })
    }
}

fn put_optional_offset(buf: &mut BytesMut, offset: Option<i64>) {
    match offset {
        Some(offset) => {
            buf.put_u8(1);
            buf.put_i64_le(offset);
        }
        None => buf.put_u8(0),
    }
}

fn read_optional_offset(reader: &mut ByteReader, field: &str) -> Result<Option<i64>> {
    if reader.flag(field)? {
        reader.i64(field).map(Some)
    } else {
        Ok(None)
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::format(format!("timestamp {} out of range", millis)))
}

/// Current time truncated to the millisecond precision the codec stores
pub fn utc_now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Calculate CRC32 of data
fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serialize `metadata` after checking its invariants
pub fn write_metadata(metadata: &BackupMetadata) -> Result<Bytes> {
    metadata.validate()?;
    metadata.to_bytes()
}

/// Atomically write `metadata` to `path`.
///
/// The bytes go to a temporary file in the same directory, are synced, and
/// the file is then linked into place. An existing file at `path` is never
/// replaced.
pub fn write_metadata_file(path: &Path, metadata: &BackupMetadata) -> Result<()> {
    let bytes = write_metadata(metadata)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(path)?;

    debug!("Wrote metadata file {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Read and validate the V3 metadata file at `path`.
///
/// V1 and V2 backups have no metadata; they fail with a format error naming
/// the detected version.
pub fn read_metadata(path: &Path) -> Result<BackupMetadata> {
    let version = sniff_version(path)?;
    if version != BackupVersion::V3 {
        return Err(Error::format(format!(
            "{} is not a V3 metadata file, found {}",
            path.display(),
            version
        )));
    }

    let data = fs::read(path)?;
    let metadata = BackupMetadata::from_bytes(&data)?;
    metadata.validate()?;
    Ok(metadata)
}
