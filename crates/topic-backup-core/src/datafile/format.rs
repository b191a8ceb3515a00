//! Binary data file format definitions.
//!
//! Data File Format (v3):
//! ```text
//! +--------------------+
//! | Header (16 bytes)  |
//! +--------------------+
//! | Frame              |
//! +--------------------+
//! | ...                |
//! +--------------------+
//! | END frame          |
//! +--------------------+
//! ```
//!
//! Header Format:
//! - magic: [u8; 4] = "KBDF"
//! - version: u8 = 3
//! - reserved: [u8; 3]
//! - partition: i32 (little-endian)
//! - checkpoint_interval: u32 (little-endian, 0 = no checkpoints)
//!
//! Frame Format:
//! - kind: u8 (0x01 record, 0x02 checkpoint, 0xFF end)
//! - len: u32 (little-endian) - length of the payload
//! - payload: [u8; len]
//!
//! Record payload:
//! - timestamp: i64 (little-endian)
//! - timestamp_type: u8 (0 = create time, 1 = log append time)
//! - offset: i64 (little-endian)
//! - key_len: i32 (little-endian, -1 for null)
//! - key: [u8; key_len] (if key_len >= 0)
//! - value_len: i32 (little-endian, -1 for null)
//! - value: [u8; value_len] (if value_len >= 0)
//! - header_count: u16 (little-endian)
//! - headers: [Header; header_count]
//!
//! Header (within record):
//! - key_len: u16 (little-endian)
//! - key: [u8; key_len] (UTF-8)
//! - value_len: i32 (little-endian, -1 for null)
//! - value: [u8; value_len] (if value_len >= 0)
//!
//! Checkpoint payload:
//! - record_index: u64 (little-endian) - records written before the checkpoint
//! - state_len: u16 (little-endian)
//! - state: [u8; state_len] - running digest of every preceding byte
//!
//! End payload:
//! - record_count: u64 (little-endian)
//!
//! The file checksum is the running digest over every byte of the file,
//! END frame included.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{put_nullable_bytes, put_str, ByteReader};
use crate::record::{Record, RecordHeader, TimestampType};
use crate::{Error, Result};

/// Magic bytes at start of a data file
pub const MAGIC_BYTES: [u8; 4] = *b"KBDF";

/// Current data file format version
pub const VERSION: u8 = 3;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Frame kind plus payload length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Data file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    pub version: u8,
    pub partition: i32,
    pub checkpoint_interval: u32,
}

impl DataFileHeader {
    /// Create a header for the current version
    pub fn new(partition: i32, checkpoint_interval: u32) -> Self {
        Self {
            version: VERSION,
            partition,
            checkpoint_interval,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC_BYTES);
        buf[4] = self.version;
        // bytes 5..8 reserved
        buf[8..12].copy_from_slice(&self.partition.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checkpoint_interval.to_le_bytes());
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::format("data file header too short"));
        }
        if data[0..4] != MAGIC_BYTES {
            return Err(Error::format("invalid data file magic bytes"));
        }

        let version = data[4];
        if version != VERSION {
            return Err(Error::format(format!(
                "unsupported data file version: {}",
                version
            )));
        }
        if data[5..8] != [0, 0, 0] {
            return Err(Error::format("data file header reserved bytes are not zero"));
        }

        let mut partition = [0u8; 4];
        partition.copy_from_slice(&data[8..12]);
        let mut interval = [0u8; 4];
        interval.copy_from_slice(&data[12..16]);

        let partition = i32::from_le_bytes(partition);
        if partition < 0 {
            return Err(Error::format(format!(
                "data file header has negative partition {}",
                partition
            )));
        }

        Ok(Self {
            version,
            partition,
            checkpoint_interval: u32::from_le_bytes(interval),
        })
    }
}

/// Kind byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Record,
    Checkpoint,
    End,
}

impl FrameKind {
    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::Record => 0x01,
            FrameKind::Checkpoint => 0x02,
            FrameKind::End => 0xFF,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(FrameKind::Record),
            0x02 => Ok(FrameKind::Checkpoint),
            0xFF => Ok(FrameKind::End),
            other => Err(Error::format(format!("unknown frame kind 0x{:02x}", other))),
        }
    }
}

/// Prefix `payload` with its frame header
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<BytesMut> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidRecord(format!("frame of {} bytes is too large", payload.len())))?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u8(kind.to_byte());
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf)
}

/// Split a frame header into kind and payload length
pub fn decode_frame_header(data: &[u8; FRAME_HEADER_SIZE]) -> Result<(FrameKind, u32)> {
    let kind = FrameKind::from_byte(data[0])?;
    let mut len = [0u8; 4];
    len.copy_from_slice(&data[1..5]);
    Ok((kind, u32::from_le_bytes(len)))
}

/// Serialize a record body (without frame header)
pub fn encode_record(record: &Record) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(64);

    buf.put_i64_le(record.timestamp);
    buf.put_u8(record.timestamp_type.to_byte());
    buf.put_i64_le(record.offset);
    put_nullable_bytes(&mut buf, record.key.as_deref())?;
    put_nullable_bytes(&mut buf, record.value.as_deref())?;

    let header_count = u16::try_from(record.headers.len()).map_err(|_| {
        Error::InvalidRecord(format!("record has {} headers", record.headers.len()))
    })?;
    buf.put_u16_le(header_count);
    for header in &record.headers {
        put_str(&mut buf, &header.key)?;
        put_nullable_bytes(&mut buf, header.value.as_deref())?;
    }

    Ok(buf)
}

/// Parse a record body; the partition comes from the file header
pub fn decode_record(payload: Bytes, partition: i32) -> Result<Record> {
    let mut reader = ByteReader::new(payload, "record");

    let timestamp = reader.i64("timestamp")?;
    let ts_byte = reader.u8("timestamp_type")?;
    let timestamp_type = TimestampType::from_byte(ts_byte)
        .ok_or_else(|| Error::format(format!("unknown timestamp type {}", ts_byte)))?;
    let offset = reader.i64("offset")?;
    let key = reader.nullable_bytes("key")?;
    let value = reader.nullable_bytes("value")?;

    let header_count = reader.u16("header_count")? as usize;
    let mut headers = Vec::with_capacity(header_count.min(reader.remaining() / 6 + 1));
    for _ in 0..header_count {
        let key = reader.str("header key")?;
        let value = reader.nullable_bytes("header value")?;
        headers.push(RecordHeader { key, value });
    }
    reader.finish()?;

    Ok(Record {
        key,
        value,
        headers,
        timestamp,
        timestamp_type,
        offset,
        partition,
    })
}

/// Checkpoint frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPayload {
    /// Records written before the checkpoint
    pub record_index: u64,
    /// Running digest of every byte preceding the checkpoint frame
    pub state: Vec<u8>,
}

impl CheckpointPayload {
    pub fn to_bytes(&self) -> Result<BytesMut> {
        let state_len = u16::try_from(self.state.len())
            .map_err(|_| Error::format("checkpoint state too long"))?;
        let mut buf = BytesMut::with_capacity(10 + self.state.len());
        buf.put_u64_le(self.record_index);
        buf.put_u16_le(state_len);
        buf.put_slice(&self.state);
        Ok(buf)
    }

    pub fn from_bytes(payload: Bytes) -> Result<Self> {
        let mut reader = ByteReader::new(payload, "checkpoint");
        let record_index = reader.u64("record_index")?;
        let state_len = reader.u16("state_len")? as usize;
        let state = reader.bytes(state_len, "state")?.to_vec();
        reader.finish()?;
        Ok(Self {
            record_index,
            state,
        })
    }
}

/// Serialize an END payload
pub fn encode_end(record_count: u64) -> [u8; 8] {
    record_count.to_le_bytes()
}

/// Parse an END payload
pub fn decode_end(payload: Bytes) -> Result<u64> {
    let mut reader = ByteReader::new(payload, "end frame");
    let count = reader.u64("record_count")?;
    reader.finish()?;
    Ok(count)
}
