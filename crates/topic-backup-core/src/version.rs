//! Backup format versions and version sniffing.
//!
//! Three on-disk shapes exist:
//!
//! - **V1**: a JSON array of `[key, value]` pairs, no header at all.
//! - **V2**: a line-oriented log starting with the `/V2\n` marker.
//! - **V3**: a binary metadata file starting with the `/V3\n` marker, which
//!   references one data file per partition.
//!
//! Sniffing evaluates a fixed, ordered list of structural predicates against
//! the leading bytes of a file.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;

use crate::{Error, Result};

/// Marker opening every V3 metadata file
pub const V3_MARKER: [u8; 4] = *b"/V3\n";

/// Marker opening every V2 backup file
pub const V2_MARKER: [u8; 4] = *b"/V2\n";

/// Backup format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackupVersion {
    V1,
    V2,
    V3,
}

impl BackupVersion {
    /// Numeric version as rendered by `inspect`
    pub fn number(self) -> u8 {
        match self {
            BackupVersion::V1 => 1,
            BackupVersion::V2 => 2,
            BackupVersion::V3 => 3,
        }
    }

    /// True for the formats without structured metadata
    pub fn is_legacy(self) -> bool {
        !matches!(self, BackupVersion::V3)
    }
}

impl fmt::Display for BackupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.number())
    }
}

/// Detect the format of the backup file at `path`.
pub fn sniff_version(path: &Path) -> Result<BackupVersion> {
    let file = File::open(path)?;
    sniff_reader(BufReader::new(file))
}

/// Detect the format from any byte source, consuming as little as possible.
pub fn sniff_reader<R: Read>(mut input: R) -> Result<BackupVersion> {
    let mut prefix = [0u8; 4];
    let filled = read_prefix(&mut input, &mut prefix)?;
    let prefix = &prefix[..filled];

    if prefix == V3_MARKER {
        return Ok(BackupVersion::V3);
    }
    if prefix == V2_MARKER {
        return Ok(BackupVersion::V2);
    }

    // V1 files are plain JSON arrays, possibly preceded by whitespace.
    if let Some(&first) = prefix.iter().find(|b| !b.is_ascii_whitespace()) {
        return classify_v1(first);
    }
    if filled < 4 {
        return Err(Error::format("empty backup file"));
    }

    let mut byte = [0u8; 1];
    loop {
        if input.read(&mut byte)? == 0 {
            return Err(Error::format("backup file contains only whitespace"));
        }
        if !byte[0].is_ascii_whitespace() {
            return classify_v1(byte[0]);
        }
    }
}

fn classify_v1(first: u8) -> Result<BackupVersion> {
    if first == b'[' {
        Ok(BackupVersion::V1)
    } else {
        Err(Error::format(format!(
            "unrecognized backup format (leading byte 0x{:02x})",
            first
        )))
    }
}

fn read_prefix<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
