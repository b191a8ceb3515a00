//! In-process cluster used by tests and dry runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ClusterSink, ClusterSource, FetchBatch, TopicDescription};
use crate::error::KafkaError;
use crate::record::Record;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct PartitionLog {
    /// First offset still readable
    log_start: i64,
    /// Records with offsets `0..records.len()`
    records: Vec<Record>,
}

#[derive(Debug)]
struct MemoryTopic {
    topic_id: Option<String>,
    partitions: Vec<PartitionLog>,
}

/// A cluster that lives entirely in memory.
///
/// Offsets are assigned from 0 per partition. Fetches for selected
/// partitions can be made to fail to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    topics: RwLock<HashMap<String, MemoryTopic>>,
    failing_fetches: RwLock<HashSet<(String, i32)>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic; fails if it already exists
    pub fn create_topic(&self, topic: &str, partition_count: i32, topic_id: Option<&str>) -> Result<()> {
        if partition_count <= 0 {
            return Err(Error::Config(format!(
                "partition count must be positive, got {}",
                partition_count
            )));
        }
        let mut topics = self.topics.write();
        if topics.contains_key(topic) {
            return Err(Error::Kafka(KafkaError::BrokerError {
                code: 36,
                message: format!("Topic '{}' already exists", topic),
            }));
        }
        topics.insert(
            topic.to_string(),
            MemoryTopic {
                topic_id: topic_id.map(str::to_string),
                partitions: (0..partition_count).map(|_| PartitionLog::default()).collect(),
            },
        );
        Ok(())
    }

    /// Append records, assigning offsets. Returns the first assigned offset.
    pub fn append(&self, topic: &str, partition: i32, records: &[Record]) -> Result<i64> {
        let mut topics = self.topics.write();
        let log = partition_mut(&mut topics, topic, partition)?;
        let base = log.records.len() as i64;
        for (i, record) in records.iter().enumerate() {
            let mut stored = record.clone();
            stored.offset = base + i as i64;
            stored.partition = partition;
            log.records.push(stored);
        }
        Ok(base)
    }

    /// Every readable record of a partition
    pub fn records(&self, topic: &str, partition: i32) -> Result<Vec<Record>> {
        let topics = self.topics.read();
        let log = partition_ref(&topics, topic, partition)?;
        Ok(log
            .records
            .iter()
            .filter(|r| r.offset >= log.log_start)
            .cloned()
            .collect())
    }

    /// Make records before `offset` unreadable, like retention would
    pub fn delete_records_before(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut topics = self.topics.write();
        let log = partition_mut(&mut topics, topic, partition)?;
        log.log_start = offset.clamp(log.log_start, log.records.len() as i64);
        Ok(())
    }

    /// Make every fetch from this partition fail
    pub fn fail_fetches(&self, topic: &str, partition: i32) {
        self.failing_fetches
            .write()
            .insert((topic.to_string(), partition));
    }

    /// True if the topic exists
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }
}

fn partition_ref<'a>(
    topics: &'a HashMap<String, MemoryTopic>,
    topic: &str,
    partition: i32,
) -> Result<&'a PartitionLog> {
    let entry = topics
        .get(topic)
        .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;
    usize::try_from(partition)
        .ok()
        .and_then(|p| entry.partitions.get(p))
        .ok_or_else(|| {
            Error::Kafka(KafkaError::PartitionNotAvailable {
                topic: topic.to_string(),
                partition,
            })
        })
}

fn partition_mut<'a>(
    topics: &'a mut HashMap<String, MemoryTopic>,
    topic: &str,
    partition: i32,
) -> Result<&'a mut PartitionLog> {
    let entry = topics
        .get_mut(topic)
        .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;
    usize::try_from(partition)
        .ok()
        .and_then(|p| entry.partitions.get_mut(p))
        .ok_or_else(|| {
            Error::Kafka(KafkaError::PartitionNotAvailable {
                topic: topic.to_string(),
                partition,
            })
        })
}

fn record_size(record: &Record) -> usize {
    let headers: usize = record
        .headers
        .iter()
        .map(|h| h.key.len() + h.value.as_ref().map_or(0, |v| v.len()))
        .sum();
    record.key.as_ref().map_or(0, |k| k.len())
        + record.value.as_ref().map_or(0, |v| v.len())
        + headers
        + 24
}

#[async_trait]
impl ClusterSource for MemoryCluster {
    async fn describe_topic(&self, topic: &str) -> Result<TopicDescription> {
        let topics = self.topics.read();
        let entry = topics
            .get(topic)
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;
        Ok(TopicDescription {
            name: topic.to_string(),
            topic_id: entry.topic_id.clone(),
            partition_count: entry.partitions.len() as i32,
        })
    }

    async fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64)> {
        let topics = self.topics.read();
        let log = partition_ref(&topics, topic, partition)?;
        Ok((log.log_start, log.records.len() as i64))
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: i32,
    ) -> Result<FetchBatch> {
        if self
            .failing_fetches
            .read()
            .contains(&(topic.to_string(), partition))
        {
            return Err(Error::Kafka(KafkaError::Protocol(format!(
                "injected fetch failure for {}/{}",
                topic, partition
            ))));
        }

        let topics = self.topics.read();
        let log = partition_ref(&topics, topic, partition)?;
        let start = offset.max(log.log_start).max(0) as usize;

        let mut records = Vec::new();
        let mut size = 0usize;
        for record in log.records.iter().skip(start) {
            let len = record_size(record);
            if !records.is_empty() && size + len > max_bytes.max(0) as usize {
                break;
            }
            size += len;
            records.push(record.clone());
        }

        let next_offset = records.last().map_or(start as i64, |r| r.offset + 1);
        Ok(FetchBatch {
            records,
            next_offset,
        })
    }
}

#[async_trait]
impl ClusterSink for MemoryCluster {
    async fn ensure_topic(&self, topic: &str, partition_count: i32) -> Result<()> {
        match self.create_topic(topic, partition_count, None) {
            Ok(()) => Ok(()),
            Err(Error::Kafka(KafkaError::BrokerError { code: 36, .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn partition_count(&self, topic: &str) -> Result<i32> {
        Ok(self.describe_topic(topic).await?.partition_count)
    }

    async fn produce(&self, topic: &str, partition: i32, records: &[Record]) -> Result<()> {
        self.append(topic, partition, records).map(|_| ())
    }
}
