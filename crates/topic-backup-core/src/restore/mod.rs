//! Restore engine: replays a backup into a topic.

mod engine;

pub use engine::{PartitionRestoreReport, RestoreEngine, RestoreReport};
