//! Kafka wire-protocol adapter for the backup and restore engines.

mod admin;
mod client;
mod fetch;
mod metadata;
mod produce;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cluster::{ClusterSink, ClusterSource, FetchBatch, TopicDescription};
use crate::config::KafkaConfig;
use crate::error::KafkaError;
use crate::record::Record;
use crate::Result;

pub use admin::{CreateOutcome, TOPIC_ALREADY_EXISTS};
pub use client::KafkaClient;
pub use metadata::{BrokerMetadata, TopicMetadata};

/// A Kafka cluster reached through its bootstrap servers.
///
/// Partition requests go to the partition leader; connections to leaders
/// are opened lazily and reused.
pub struct KafkaCluster {
    config: KafkaConfig,
    bootstrap: KafkaClient,
    brokers: Mutex<HashMap<i32, BrokerMetadata>>,
    connections: Mutex<HashMap<i32, Arc<KafkaClient>>>,
    topics: Mutex<HashMap<String, TopicMetadata>>,
}

impl KafkaCluster {
    /// Connect to the first reachable bootstrap server
    pub async fn connect(config: KafkaConfig) -> Result<Self> {
        let bootstrap = KafkaClient::new(config.clone());
        bootstrap.connect().await?;
        Ok(Self {
            config,
            bootstrap,
            brokers: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        })
    }

    fn timeout_ms(&self) -> i32 {
        i32::try_from(self.config.request_timeout_ms).unwrap_or(i32::MAX)
    }

    /// Fresh metadata for a topic, refreshing the broker and topic caches
    async fn refresh_topic(&self, topic: &str) -> Result<TopicMetadata> {
        let (metadata, brokers) = metadata::fetch_topic_metadata(&self.bootstrap, topic).await?;

        self.brokers
            .lock()
            .await
            .extend(brokers.into_iter().map(|b| (b.node_id, b)));
        self.topics
            .lock()
            .await
            .insert(topic.to_string(), metadata.clone());
        Ok(metadata)
    }

    async fn topic_metadata(&self, topic: &str) -> Result<TopicMetadata> {
        if let Some(metadata) = self.topics.lock().await.get(topic) {
            return Ok(metadata.clone());
        }
        self.refresh_topic(topic).await
    }

    /// Leader of a partition. Freshly created topics may not have elected
    /// leaders yet, so missing leaders are re-queried a few times.
    async fn leader_id(&self, topic: &str, partition: i32) -> Result<i32> {
        let mut metadata = self.topic_metadata(topic).await?;
        let attempts = self.config.connect_retries.max(1);
        for attempt in 1..=attempts {
            if let Some(leader) = metadata.leader(partition).filter(|id| *id >= 0) {
                return Ok(leader);
            }
            if attempt < attempts {
                debug!(
                    "No leader for {}:{} yet (attempt {}/{})",
                    topic, partition, attempt, attempts
                );
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                metadata = self.refresh_topic(topic).await?;
            }
        }
        Err(KafkaError::PartitionNotAvailable {
            topic: topic.to_string(),
            partition,
        }
        .into())
    }

    /// Client connected to the leader of a partition
    async fn leader_client(&self, topic: &str, partition: i32) -> Result<Arc<KafkaClient>> {
        let leader = self.leader_id(topic, partition).await?;

        let mut connections = self.connections.lock().await;
        if let Some(client) = connections.get(&leader) {
            return Ok(Arc::clone(client));
        }

        let address = self
            .brokers
            .lock()
            .await
            .get(&leader)
            .map(BrokerMetadata::address)
            .ok_or(KafkaError::NoBrokersAvailable)?;

        debug!(
            "Connecting to leader {} ({}) for {}:{}",
            leader, address, topic, partition
        );
        let client = Arc::new(KafkaClient::new(self.config.clone()));
        client.connect_to(&address).await?;
        connections.insert(leader, Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl ClusterSource for KafkaCluster {
    async fn describe_topic(&self, topic: &str) -> Result<TopicDescription> {
        let metadata = self.refresh_topic(topic).await?;
        Ok(TopicDescription {
            name: metadata.name.clone(),
            topic_id: metadata.topic_id.clone(),
            partition_count: metadata.partition_count(),
        })
    }

    async fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64)> {
        let client = self.leader_client(topic, partition).await?;
        fetch::get_offsets(&client, topic, partition).await
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: i32,
    ) -> Result<FetchBatch> {
        let client = self.leader_client(topic, partition).await?;
        fetch::fetch(&client, topic, partition, offset, max_bytes).await
    }
}

#[async_trait]
impl ClusterSink for KafkaCluster {
    async fn ensure_topic(&self, topic: &str, partition_count: i32) -> Result<()> {
        admin::create_topic(
            &self.bootstrap,
            topic,
            partition_count,
            self.config.replication_factor,
            self.timeout_ms(),
        )
        .await?;
        // Leaders are only known once the topic exists
        self.topics.lock().await.remove(topic);
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> Result<i32> {
        Ok(self.refresh_topic(topic).await?.partition_count())
    }

    async fn produce(&self, topic: &str, partition: i32, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let client = self.leader_client(topic, partition).await?;
        produce::produce(&client, topic, partition, records, self.timeout_ms()).await?;
        Ok(())
    }
}
