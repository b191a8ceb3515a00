//! Per-partition V3 data files.
//!
//! A data file is a header followed by length-prefixed frames. Every byte is
//! fed into a running checksum whose final value is recorded in the backup
//! metadata, and sparse checkpoint frames snapshot that running value so a
//! corrupted region can be narrowed down to one checkpoint interval.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{DataFileHeader, FrameKind, MAGIC_BYTES, VERSION};
pub use reader::{CheckpointObservation, DataFileEntry, DataFileReader};
pub use writer::{DataFileWriter, DataFileWriterConfig, DEFAULT_CHECKPOINT_INTERVAL};
