//! Offline integrity verification of V3 backups.
//!
//! Two independent checks are offered:
//!
//! - **file**: stream the raw bytes of every data file through the checksum
//!   and compare the result with the digest recorded in the metadata.
//! - **record**: parse every frame, compare the running checksum against each
//!   embedded checkpoint, then compare the final digest. A checkpoint
//!   mismatch narrows the damage down to one checkpoint interval.
//!
//! Every data file is checked even after a failure; results are aggregated
//! into a [`VerificationReport`].

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::checksum::{ChecksumAlgorithm, ChecksumRegistry};
use crate::datafile::{DataFileEntry, DataFileReader};
use crate::layout::{data_directory, resolve_location};
use crate::metadata::{read_metadata, BackupMetadata, DataFileDescriptor};
use crate::version::{sniff_version, BackupVersion};
use crate::{Error, Result};

/// Reason reported when the final digest differs and no checkpoint narrowed it down
pub const FULL_FILE_MISMATCH: &str = "Found checksum mismatch after reading full data file.";

/// Depth of verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyLevel {
    /// Whole-file digest only
    #[default]
    File,
    /// Frame by frame, checkpoints included
    Record,
}

impl fmt::Display for VerifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyLevel::File => write!(f, "file"),
            VerifyLevel::Record => write!(f, "record"),
        }
    }
}

impl FromStr for VerifyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(VerifyLevel::File),
            "record" => Ok(VerifyLevel::Record),
            other => Err(Error::Config(format!(
                "unknown verification level {:?} (expected file or record)",
                other
            ))),
        }
    }
}

/// Outcome for a single data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVerdict {
    Intact,
    NotIntact { reason: Option<String> },
    CannotVerify { algorithm: String },
}

/// Verification result of one data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub filename: String,
    pub verdict: FileVerdict,
}

impl FileReport {
    /// Human-readable lines for this file
    pub fn render(&self) -> Vec<String> {
        match &self.verdict {
            FileVerdict::Intact => vec![format!("Integrity of {} is intact.", self.filename)],
            FileVerdict::NotIntact { reason } => {
                let mut lines = vec![format!("Integrity of {} is not intact!", self.filename)];
                if let Some(reason) = reason {
                    lines.push(format!("    {}", reason));
                }
                lines
            }
            FileVerdict::CannotVerify { algorithm } => vec![format!(
                "Integrity of {} cannot be verified, unknown checksum algorithm {:?}.",
                self.filename, algorithm
            )],
        }
    }
}

/// Aggregated verification result of a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub level: VerifyLevel,
    pub files: Vec<FileReport>,
}

impl VerificationReport {
    pub fn intact_count(&self) -> usize {
        self.count(|v| matches!(v, FileVerdict::Intact))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|v| matches!(v, FileVerdict::NotIntact { .. }))
    }

    pub fn unverifiable_count(&self) -> usize {
        self.count(|v| matches!(v, FileVerdict::CannotVerify { .. }))
    }

    fn count(&self, predicate: impl Fn(&FileVerdict) -> bool) -> usize {
        self.files.iter().filter(|f| predicate(&f.verdict)).count()
    }

    /// True when no file failed.
    ///
    /// Files that could not be verified count as failures only when
    /// `unknown_as_failure` is set.
    pub fn is_success(&self, unknown_as_failure: bool) -> bool {
        self.failed_count() == 0 && !(unknown_as_failure && self.unverifiable_count() > 0)
    }

    /// Per-file lines followed by the summary
    pub fn render(&self, unknown_as_failure: bool) -> String {
        let mut lines: Vec<String> = self.files.iter().flat_map(FileReport::render).collect();

        let unverifiable = self.unverifiable_count();
        if unverifiable > 0 {
            lines.push(format!(
                "⚠️ Could not verify {} data files with an unknown checksum algorithm.",
                unverifiable
            ));
        }
        if self.is_success(unknown_as_failure) {
            lines.push(format!(
                "✅ Verified {} data files in backup OK.",
                self.intact_count()
            ));
        } else {
            lines.push("💥 Failed to verify integrity of some data files.".to_string());
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Runs integrity checks against backups on disk
pub struct Verifier<'a> {
    registry: &'a ChecksumRegistry,
}

impl<'a> Verifier<'a> {
    pub fn new(registry: &'a ChecksumRegistry) -> Self {
        Self { registry }
    }

    /// Verify the backup at `location` (a metadata file or its directory).
    ///
    /// V1 and V2 backups cannot be verified and fail immediately.
    pub fn verify_location(&self, location: &Path, level: VerifyLevel) -> Result<VerificationReport> {
        let path = resolve_location(location)?;
        let version = sniff_version(&path)?;
        if version != BackupVersion::V3 {
            return Err(Error::UnsupportedLegacyOperation {
                operation: "verified",
                found: version,
            });
        }

        let metadata = read_metadata(&path)?;
        Ok(self.verify_metadata(&metadata, &data_directory(&path), level))
    }

    /// Verify every data file listed in `metadata`, resolved against `dir`.
    pub fn verify_metadata(
        &self,
        metadata: &BackupMetadata,
        dir: &Path,
        level: VerifyLevel,
    ) -> VerificationReport {
        let algorithm = self.registry.get(&metadata.checksum_algorithm).ok();

        let files = metadata
            .data_files
            .iter()
            .map(|descriptor| {
                let verdict = match &algorithm {
                    None => FileVerdict::CannotVerify {
                        algorithm: metadata.checksum_algorithm.clone(),
                    },
                    Some(algorithm) => {
                        let path = dir.join(&descriptor.filename);
                        match level {
                            VerifyLevel::File => verify_file(&path, algorithm.as_ref(), descriptor),
                            VerifyLevel::Record => {
                                verify_records(&path, algorithm.as_ref(), descriptor)
                            }
                        }
                    }
                };
                debug!(
                    "Verified {} at {} level: {:?}",
                    descriptor.filename, level, verdict
                );
                FileReport {
                    filename: descriptor.filename.clone(),
                    verdict,
                }
            })
            .collect();

        VerificationReport { level, files }
    }
}

fn not_intact(err: Error) -> FileVerdict {
    FileVerdict::NotIntact {
        reason: Some(err.to_string()),
    }
}

/// Whole-file digest comparison
fn verify_file(
    path: &Path,
    algorithm: &dyn ChecksumAlgorithm,
    descriptor: &DataFileDescriptor,
) -> FileVerdict {
    match file_digest(path, algorithm) {
        Ok(digest) if digest == descriptor.checksum => FileVerdict::Intact,
        Ok(_) => FileVerdict::NotIntact { reason: None },
        Err(e) => not_intact(e),
    }
}

fn file_digest(path: &Path, algorithm: &dyn ChecksumAlgorithm) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut running = algorithm.running();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        running.update(&buf[..n]);
    }
    Ok(running.digest())
}

/// Frame-by-frame comparison including checkpoints
fn verify_records(
    path: &Path,
    algorithm: &dyn ChecksumAlgorithm,
    descriptor: &DataFileDescriptor,
) -> FileVerdict {
    let mut reader = match DataFileReader::open(path, algorithm) {
        Ok(reader) => reader,
        Err(e) => return not_intact(e),
    };

    let mut last_good_index = 0u64;
    loop {
        match reader.next_entry() {
            Ok(Some(DataFileEntry::Record(_))) => {}
            Ok(Some(DataFileEntry::Checkpoint(observation))) => {
                if !observation.matches() {
                    return not_intact(Error::InvalidChecksum(format!(
                        "Found checksum mismatch between record {} and record {}.",
                        last_good_index, observation.record_index
                    )));
                }
                last_good_index = observation.record_index;
            }
            Ok(None) => break,
            Err(e) => return not_intact(e),
        }
    }

    if reader.digest() != descriptor.checksum {
        return not_intact(Error::InvalidChecksum(FULL_FILE_MISMATCH.to_string()));
    }
    if reader.records_read() != descriptor.record_count {
        return not_intact(Error::format(format!(
            "data file holds {} records, metadata declares {}",
            reader.records_read(),
            descriptor.record_count
        )));
    }
    FileVerdict::Intact
}
