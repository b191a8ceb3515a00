//! JSON description of a backup, as printed by `inspect`.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::checksum::{ChecksumRegistry, UNKNOWN_ALGORITHM};
use crate::layout::resolve_location;
use crate::metadata::{read_metadata, BackupMetadata, DataFileDescriptor};
use crate::version::{sniff_version, BackupVersion};
use crate::Result;

/// Warning emitted when the metadata names an algorithm this build lacks
pub const UNKNOWN_ALGORITHM_WARNING: &str = "Warning! This file has an unknown checksum algorithm \
     and cannot be restored with this version of topic-backup.";

/// One data file entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFileView {
    pub filename: String,
    pub partition: i32,
    pub checksum_hex: String,
    pub record_count: u64,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
}

impl From<&DataFileDescriptor> for DataFileView {
    fn from(descriptor: &DataFileDescriptor) -> Self {
        Self {
            filename: descriptor.filename.clone(),
            partition: descriptor.partition,
            checksum_hex: descriptor.checksum_hex(),
            record_count: descriptor.record_count,
            start_offset: descriptor.start_offset,
            end_offset: descriptor.end_offset,
        }
    }
}

/// Full V3 description; field order is the output order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataView {
    pub version: u8,
    pub tool_name: String,
    pub tool_version: String,
    pub started_at: String,
    pub finished_at: String,
    pub topic_name: String,
    pub topic_id: Option<String>,
    pub partition_count: i32,
    pub checksum_algorithm: String,
    pub data_files: Vec<DataFileView>,
}

impl MetadataView {
    /// Describe `metadata`, naming unregistered algorithms `"unknown"`
    pub fn new(metadata: &BackupMetadata, registry: &ChecksumRegistry) -> Self {
        Self {
            version: metadata.version(),
            tool_name: metadata.tool_name.clone(),
            tool_version: metadata.tool_version.clone(),
            started_at: render_timestamp(&metadata.started_at),
            finished_at: render_timestamp(&metadata.finished_at),
            topic_name: metadata.topic_name.clone(),
            topic_id: metadata.topic_id.clone(),
            partition_count: metadata.partition_count,
            checksum_algorithm: registry
                .resolve_name(&metadata.checksum_algorithm)
                .to_string(),
            data_files: metadata.data_files.iter().map(DataFileView::from).collect(),
        }
    }
}

/// What `inspect` prints on stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InspectOutput {
    Legacy { version: u8 },
    V3(MetadataView),
}

/// Inspect result: the JSON document and the diagnostics to print beside it
#[derive(Debug, Clone)]
pub struct Inspection {
    pub output: InspectOutput,
    pub warnings: Vec<String>,
}

impl Inspection {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.output)?)
    }
}

/// Describe the backup at `location`.
pub fn inspect(location: &Path, registry: &ChecksumRegistry) -> Result<Inspection> {
    let path = resolve_location(location)?;
    let version = sniff_version(&path)?;
    if version != BackupVersion::V3 {
        return Ok(Inspection {
            output: InspectOutput::Legacy {
                version: version.number(),
            },
            warnings: Vec::new(),
        });
    }

    let metadata = read_metadata(&path)?;
    let view = MetadataView::new(&metadata, registry);
    let mut warnings = Vec::new();
    if view.checksum_algorithm == UNKNOWN_ALGORITHM {
        warnings.push(UNKNOWN_ALGORITHM_WARNING.to_string());
    }

    Ok(Inspection {
        output: InspectOutput::V3(view),
        warnings,
    })
}

/// RFC 3339 with microseconds and an explicit `+00:00` offset
pub fn render_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}
