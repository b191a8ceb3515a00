//! Data file reader that recomputes the running checksum as it goes.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::format::{
    decode_end, decode_frame_header, decode_record, CheckpointPayload, DataFileHeader, FrameKind,
    FRAME_HEADER_SIZE, HEADER_SIZE,
};
use crate::checksum::{ChecksumAlgorithm, RunningChecksum};
use crate::record::Record;
use crate::{Error, Result};

/// A checkpoint as seen by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointObservation {
    /// Records preceding the checkpoint
    pub record_index: u64,
    /// Digest stored in the file
    pub stored: Vec<u8>,
    /// Digest recomputed over the bytes actually read
    pub computed: Vec<u8>,
}

impl CheckpointObservation {
    pub fn matches(&self) -> bool {
        self.stored == self.computed
    }
}

/// One element of a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFileEntry {
    Record(Record),
    Checkpoint(CheckpointObservation),
}

/// Lazy, single-pass reader over a data file.
///
/// Iterating yields records only; [`next_entry`] also surfaces checkpoints.
/// After the END frame, [`digest`] is the checksum of the whole file.
///
/// [`next_entry`]: DataFileReader::next_entry
/// [`digest`]: DataFileReader::digest
pub struct DataFileReader {
    path: PathBuf,
    input: BufReader<File>,
    header: DataFileHeader,
    running: Box<dyn RunningChecksum>,
    records_read: u64,
    checkpoints_read: u64,
    finished: bool,
    failed: bool,
}

impl DataFileReader {
    /// Open a data file and parse its header
    pub fn open(path: &Path, algorithm: &dyn ChecksumAlgorithm) -> Result<Self> {
        let file = File::open(path)?;
        let mut input = BufReader::new(file);

        let mut header_bytes = [0u8; HEADER_SIZE];
        let filled = read_full(&mut input, &mut header_bytes)?;
        if filled < HEADER_SIZE {
            return Err(Error::format(format!(
                "{} is too short to be a data file ({} bytes)",
                path.display(),
                filled
            )));
        }
        let header = DataFileHeader::from_bytes(&header_bytes)?;

        let mut running = algorithm.running();
        running.update(&header_bytes);

        debug!(
            "Opened data file {}: partition {}, checkpoint interval {}",
            path.display(),
            header.partition,
            header.checkpoint_interval
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            header,
            running,
            records_read: 0,
            checkpoints_read: 0,
            finished: false,
            failed: false,
        })
    }

    /// Parsed file header
    pub fn header(&self) -> &DataFileHeader {
        &self.header
    }

    /// Partition recorded in the header
    pub fn header_partition(&self) -> i32 {
        self.header.partition
    }

    /// Records read so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Checkpoints read so far
    pub fn checkpoints_read(&self) -> u64 {
        self.checkpoints_read
    }

    /// True once the END frame was read and validated
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Running digest over every byte consumed so far
    pub fn digest(&self) -> Vec<u8> {
        self.running.digest()
    }

    /// Read the next record or checkpoint, `None` after the END frame.
    pub fn next_entry(&mut self) -> Result<Option<DataFileEntry>> {
        if self.finished || self.failed {
            return Ok(None);
        }
        let result = self.read_entry();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_entry(&mut self) -> Result<Option<DataFileEntry>> {
        let mut frame_header = [0u8; FRAME_HEADER_SIZE];
        let filled = read_full(&mut self.input, &mut frame_header)?;
        if filled == 0 {
            return Err(self.truncated("end of file before END frame"));
        }
        if filled < FRAME_HEADER_SIZE {
            return Err(self.truncated("end of file inside a frame header"));
        }
        let (kind, len) = decode_frame_header(&frame_header)?;

        // Checkpoint state covers every byte before the checkpoint frame.
        let state_before = match kind {
            FrameKind::Checkpoint => Some(self.running.digest()),
            _ => None,
        };

        let payload = self.read_payload(len)?;
        self.running.update(&frame_header);
        self.running.update(&payload);

        match kind {
            FrameKind::Record => {
                let record = decode_record(payload, self.header.partition)?;
                self.records_read += 1;
                Ok(Some(DataFileEntry::Record(record)))
            }
            FrameKind::Checkpoint => {
                let checkpoint = CheckpointPayload::from_bytes(payload)?;
                if checkpoint.record_index != self.records_read {
                    return Err(Error::format(format!(
                        "checkpoint claims {} preceding records, {} were read",
                        checkpoint.record_index, self.records_read
                    )));
                }
                self.checkpoints_read += 1;
                Ok(Some(DataFileEntry::Checkpoint(CheckpointObservation {
                    record_index: checkpoint.record_index,
                    stored: checkpoint.state,
                    computed: state_before.unwrap_or_default(),
                })))
            }
            FrameKind::End => {
                let count = decode_end(payload)?;
                if count != self.records_read {
                    return Err(Error::format(format!(
                        "END frame claims {} records, {} were read",
                        count, self.records_read
                    )));
                }
                let mut probe = [0u8; 1];
                if read_full(&mut self.input, &mut probe)? != 0 {
                    return Err(Error::format(format!(
                        "unexpected bytes after END frame in {}",
                        self.path.display()
                    )));
                }
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn read_payload(&mut self, len: u32) -> Result<Bytes> {
        // Read through `take` so a corrupt length never triggers a huge allocation.
        let mut payload = Vec::new();
        (&mut self.input)
            .take(u64::from(len))
            .read_to_end(&mut payload)?;
        if payload.len() < len as usize {
            return Err(self.truncated(&format!(
                "end of file inside a frame ({} of {} bytes)",
                payload.len(),
                len
            )));
        }
        Ok(Bytes::from(payload))
    }

    fn truncated(&self, detail: &str) -> Error {
        Error::TruncatedRecord {
            record_index: self.records_read,
            detail: format!("{}: {}", self.path.display(), detail),
        }
    }

    /// Read all remaining records
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for record in self.by_ref() {
            records.push(record?);
        }
        Ok(records)
    }
}

impl Iterator for DataFileReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_entry() {
                Ok(Some(DataFileEntry::Record(record))) => return Some(Ok(record)),
                Ok(Some(DataFileEntry::Checkpoint(_))) => continue,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Fill as much of `buf` as the input allows, returning the byte count.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
