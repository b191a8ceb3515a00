//! In-flight record representation shared by the writers, readers and the
//! cluster adapters.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How a record's timestamp was assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampType {
    /// Set by the producer
    #[default]
    CreateTime,
    /// Set by the broker when appended to the log
    LogAppendTime,
}

impl TimestampType {
    /// Byte used in the data file record body
    pub fn to_byte(self) -> u8 {
        match self {
            TimestampType::CreateTime => 0,
            TimestampType::LogAppendTime => 1,
        }
    }

    /// Parse the data file byte, `None` for anything unknown
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TimestampType::CreateTime),
            1 => Some(TimestampType::LogAppendTime),
            _ => None,
        }
    }
}

/// Record header, order within a record is preserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Header name
    pub key: String,

    /// Header value
    pub value: Option<Bytes>,
}

impl RecordHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key (optional)
    pub key: Option<Bytes>,

    /// Record value (optional)
    pub value: Option<Bytes>,

    /// Record headers
    pub headers: Vec<RecordHeader>,

    /// Record timestamp (epoch milliseconds)
    pub timestamp: i64,

    /// Timestamp semantics
    pub timestamp_type: TimestampType,

    /// Offset in the source partition
    pub offset: i64,

    /// Source partition
    pub partition: i32,
}

impl Record {
    /// Create a create-time record with no headers
    pub fn new(
        partition: i32,
        offset: i64,
        key: Option<Bytes>,
        value: Option<Bytes>,
        timestamp: i64,
    ) -> Self {
        Self {
            key,
            value,
            headers: Vec::new(),
            timestamp,
            timestamp_type: TimestampType::CreateTime,
            offset,
            partition,
        }
    }

    /// Builder-style header append
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(RecordHeader::new(key, value));
        self
    }

    /// Builder-style timestamp type override
    pub fn with_timestamp_type(mut self, timestamp_type: TimestampType) -> Self {
        self.timestamp_type = timestamp_type;
        self
    }

    /// True when key, value, headers and timestamp all match.
    ///
    /// Offsets and partitions are assigned by the destination on restore and
    /// are not part of the comparison.
    pub fn same_payload(&self, other: &Record) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.headers == other.headers
            && self.timestamp == other.timestamp
            && self.timestamp_type == other.timestamp_type
    }
}
