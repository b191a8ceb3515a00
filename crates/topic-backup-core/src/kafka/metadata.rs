//! Kafka Metadata API: topic shape, partition leaders and broker addresses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{ApiKey, MetadataRequest, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::debug;

use super::KafkaClient;
use crate::error::KafkaError;
use crate::{Error, Result};

/// Broker address as advertised by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerMetadata {
    /// `host:port` suitable for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Topic metadata
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    /// Topic id rendered as URL-safe base64, absent for the nil id
    pub topic_id: Option<String>,
    /// `(partition, leader)` pairs sorted by partition
    pub leaders: Vec<(i32, i32)>,
}

impl TopicMetadata {
    pub fn partition_count(&self) -> i32 {
        self.leaders.len() as i32
    }

    pub fn leader(&self, partition: i32) -> Option<i32> {
        self.leaders
            .iter()
            .find(|(p, _)| *p == partition)
            .map(|(_, leader)| *leader)
    }
}

/// Metadata for a single topic plus every known broker.
///
/// A missing topic (error code 3) becomes [`Error::TopicNotFound`].
pub async fn fetch_topic_metadata(
    client: &KafkaClient,
    topic: &str,
) -> Result<(TopicMetadata, Vec<BrokerMetadata>)> {
    let request = MetadataRequest::default()
        .with_topics(Some(vec![MetadataRequestTopic::default()
            .with_name(Some(TopicName(StrBytes::from_string(topic.to_string()))))]))
        .with_allow_auto_topic_creation(false);

    let response: MetadataResponse = client.send_request(ApiKey::Metadata, request).await?;

    let brokers: Vec<BrokerMetadata> = response
        .brokers
        .iter()
        .map(|broker| BrokerMetadata {
            node_id: broker.node_id.0,
            host: broker.host.to_string(),
            port: broker.port,
        })
        .collect();
    debug!("Discovered {} brokers", brokers.len());

    let entry = response
        .topics
        .iter()
        .find(|t| t.name.as_ref().map(|n| n.as_str()) == Some(topic))
        .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;

    match entry.error_code {
        0 => {}
        3 => return Err(Error::TopicNotFound(topic.to_string())),
        code => {
            return Err(KafkaError::BrokerError {
                code,
                message: format!("Metadata request for topic '{}' failed", topic),
            }
            .into())
        }
    }

    let mut leaders: Vec<(i32, i32)> = entry
        .partitions
        .iter()
        .map(|p| (p.partition_index, p.leader_id.0))
        .collect();
    leaders.sort_unstable();

    let topic_id = if entry.topic_id.is_nil() {
        None
    } else {
        Some(URL_SAFE_NO_PAD.encode(entry.topic_id.as_bytes()))
    };

    debug!(
        "Topic {} has {} partitions (id: {:?})",
        topic,
        leaders.len(),
        topic_id
    );

    Ok((
        TopicMetadata {
            name: topic.to_string(),
            topic_id,
            leaders,
        },
        brokers,
    ))
}
