//! Backup engine: copies a topic from a cluster into a V3 (or V2) backup.

mod engine;

pub use engine::{BackupEngine, BackupReport};
