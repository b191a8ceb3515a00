//! Readers for the V1 and V2 backup formats, and the V2 writer.
//!
//! Both formats hold a single partition's key/value pairs with no headers,
//! timestamps or integrity information.
//!
//! - V1: a JSON array of `[key, value]` pairs. JSON strings are taken as
//!   UTF-8 bytes, `null` as absent, and any other JSON value as its compact
//!   JSON text.
//! - V2: a `/V2\n` marker line followed by `<key>\t<value>\n` lines, each
//!   side base64 encoded or `-` when absent.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::version::{sniff_version, BackupVersion, V2_MARKER};
use crate::{Error, Result};

/// Placeholder for an absent key or value in V2 files
const V2_NULL: &str = "-";

/// A key/value pair from a legacy backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl LegacyRecord {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self { key, value }
    }
}

/// Read every record of a V1 or V2 backup file.
pub fn read_legacy(path: &Path) -> Result<(BackupVersion, Vec<LegacyRecord>)> {
    let version = sniff_version(path)?;
    let records = match version {
        BackupVersion::V1 => read_v1(path)?,
        BackupVersion::V2 => read_v2(path)?,
        BackupVersion::V3 => {
            return Err(Error::format(format!(
                "{} is a V3 backup, not a legacy one",
                path.display()
            )))
        }
    };
    debug!(
        "Read {} records from {} backup {}",
        records.len(),
        version,
        path.display()
    );
    Ok((version, records))
}

/// Read a V1 backup.
pub fn read_v1(path: &Path) -> Result<Vec<LegacyRecord>> {
    let data = fs::read(path)?;
    parse_v1(&data)
}

fn parse_v1(data: &[u8]) -> Result<Vec<LegacyRecord>> {
    let document: Value = serde_json::from_slice(data)
        .map_err(|e| Error::format(format!("invalid V1 backup: {}", e)))?;
    let entries = match document {
        Value::Array(entries) => entries,
        _ => return Err(Error::format("V1 backup is not a JSON array")),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Null);
                let key = pair.pop().unwrap_or(Value::Null);
                Ok(LegacyRecord::new(v1_bytes(key), v1_bytes(value)))
            }
            _ => Err(Error::format(format!(
                "V1 backup entry {} is not a [key, value] pair",
                index
            ))),
        })
        .collect()
}

fn v1_bytes(value: Value) -> Option<Bytes> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Bytes::from(s)),
        other => Some(Bytes::from(other.to_string())),
    }
}

/// Read a V2 backup.
pub fn read_v2(path: &Path) -> Result<Vec<LegacyRecord>> {
    let reader = BufReader::new(File::open(path)?);
    parse_v2(reader)
}

fn parse_v2<R: BufRead>(reader: R) -> Result<Vec<LegacyRecord>> {
    let mut lines = reader.lines();
    let marker = lines.next().transpose()?.unwrap_or_default();
    if marker != "/V2" {
        return Err(Error::format("V2 backup does not start with the /V2 marker"));
    }

    let mut records = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        // marker is line 1
        let line_number = index + 2;
        let (key, value) = line.split_once('\t').ok_or_else(|| {
            Error::format(format!("V2 backup line {} has no tab separator", line_number))
        })?;
        records.push(LegacyRecord::new(
            decode_v2_field(key, line_number)?,
            decode_v2_field(value, line_number)?,
        ));
    }
    Ok(records)
}

fn decode_v2_field(field: &str, line_number: usize) -> Result<Option<Bytes>> {
    if field == V2_NULL {
        return Ok(None);
    }
    STANDARD
        .decode(field)
        .map(|data| Some(Bytes::from(data)))
        .map_err(|e| Error::format(format!("V2 backup line {}: {}", line_number, e)))
}

fn encode_v2_field(field: Option<&[u8]>) -> String {
    match field {
        Some(data) => STANDARD.encode(data),
        None => V2_NULL.to_string(),
    }
}

/// Streams key/value pairs into a V2 backup file.
///
/// Writes go to a temporary file that [`finalize`](V2Writer::finalize) moves
/// into place.
pub struct V2Writer {
    path: PathBuf,
    output: BufWriter<NamedTempFile>,
    record_count: u64,
}

impl V2Writer {
    /// Start a new V2 file at `path`; fails if it already exists
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(Error::BackupExists(path.to_path_buf()));
        }
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = NamedTempFile::new_in(dir)?;
        let mut output = BufWriter::new(temp);
        output.write_all(&V2_MARKER)?;

        Ok(Self {
            path: path.to_path_buf(),
            output,
            record_count: 0,
        })
    }

    /// Append one key/value pair
    pub fn append(&mut self, key: Option<&[u8]>, value: Option<&[u8]>) -> Result<()> {
        writeln!(
            self.output,
            "{}\t{}",
            encode_v2_field(key),
            encode_v2_field(value)
        )?;
        self.record_count += 1;
        Ok(())
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Sync and move the file into place, returning the record count
    pub fn finalize(self) -> Result<u64> {
        let temp = self
            .output
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&self.path)?;

        info!(
            "Wrote V2 backup {} with {} records",
            self.path.display(),
            self.record_count
        );
        Ok(self.record_count)
    }
}
