//! Boundary between the backup engines and a live cluster.
//!
//! The engines only talk to a cluster through [`ClusterSource`] and
//! [`ClusterSink`]. [`KafkaCluster`](crate::kafka::KafkaCluster) speaks the
//! Kafka wire protocol; [`MemoryCluster`] keeps everything in process.

pub mod memory;

use async_trait::async_trait;

use crate::record::Record;
use crate::Result;

pub use memory::MemoryCluster;

/// Shape of a topic as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescription {
    pub name: String,
    /// Opaque cluster-assigned identifier, if the cluster has one
    pub topic_id: Option<String>,
    pub partition_count: i32,
}

/// Result of one fetch
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Records in offset order. May start before the requested offset.
    pub records: Vec<Record>,
    /// Offset to request next
    pub next_offset: i64,
}

/// Read side of a cluster
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Describe a topic; [`Error::TopicNotFound`](crate::Error::TopicNotFound) if absent
    async fn describe_topic(&self, topic: &str) -> Result<TopicDescription>;

    /// Earliest and latest (next to be written) offsets of a partition
    async fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64)>;

    /// Fetch records starting at `offset`, bounded by `max_bytes`
    async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: i32,
    ) -> Result<FetchBatch>;
}

/// Write side of a cluster
#[async_trait]
pub trait ClusterSink: Send + Sync {
    /// Create the topic if it does not exist yet
    async fn ensure_topic(&self, topic: &str, partition_count: i32) -> Result<()>;

    /// Current partition count of an existing topic
    async fn partition_count(&self, topic: &str) -> Result<i32>;

    /// Append records to a partition. Offsets are assigned by the cluster.
    async fn produce(&self, topic: &str, partition: i32, records: &[Record]) -> Result<()>;
}
