//! On-disk layout of a V3 backup.
//!
//! ```text
//! <destination>/topic-<topic_name>/
//!     <topic_name>.metadata
//!     <topic_name>:<partition>.data
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Extension of the metadata file
pub const METADATA_EXTENSION: &str = "metadata";

/// Directory holding one topic's backup
pub fn topic_directory(destination: &Path, topic: &str) -> PathBuf {
    destination.join(format!("topic-{}", topic))
}

/// File name of the metadata file for `topic`
pub fn metadata_file_name(topic: &str) -> String {
    format!("{}.{}", topic, METADATA_EXTENSION)
}

/// File name of the data file for one partition
pub fn data_file_name(topic: &str, partition: i32) -> String {
    format!("{}:{}.data", topic, partition)
}

/// Path of the metadata file for `topic` under `destination`
pub fn metadata_path(destination: &Path, topic: &str) -> PathBuf {
    topic_directory(destination, topic).join(metadata_file_name(topic))
}

/// Directory against which data file names in a metadata file resolve
pub fn data_directory(metadata_path: &Path) -> PathBuf {
    match metadata_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Turn a user-supplied location into the backup file to open.
///
/// A file is used as is. A directory must contain exactly one `.metadata`
/// file.
pub fn resolve_location(location: &Path) -> Result<PathBuf> {
    if !location.is_dir() {
        if !location.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup location {} does not exist", location.display()),
            )));
        }
        return Ok(location.to_path_buf());
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(location)? {
        let path = entry?.path();
        let is_metadata = path
            .extension()
            .map(|ext| ext == METADATA_EXTENSION)
            .unwrap_or(false);
        if is_metadata && path.is_file() {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::format(format!(
            "no .metadata file found in {}",
            location.display()
        ))),
        n => Err(Error::format(format!(
            "{} .metadata files found in {}, expected exactly one",
            n,
            location.display()
        ))),
    }
}
