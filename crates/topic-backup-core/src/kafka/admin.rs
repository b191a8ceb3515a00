//! Kafka CreateTopics API.

use kafka_protocol::messages::create_topics_request::{CreatableTopic, CreateTopicsRequest};
use kafka_protocol::messages::{ApiKey, CreateTopicsResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::{debug, info};

use super::KafkaClient;
use crate::error::KafkaError;
use crate::Result;

/// Broker error code for TOPIC_ALREADY_EXISTS
pub const TOPIC_ALREADY_EXISTS: i16 = 36;

/// Outcome of a create request for a single topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Create a topic, tolerating one that already exists
pub async fn create_topic(
    client: &KafkaClient,
    topic: &str,
    num_partitions: i32,
    replication_factor: i16,
    timeout_ms: i32,
) -> Result<CreateOutcome> {
    let request = CreateTopicsRequest::default()
        .with_topics(vec![CreatableTopic::default()
            .with_name(TopicName(StrBytes::from_string(topic.to_string())))
            .with_num_partitions(num_partitions)
            .with_replication_factor(replication_factor)])
        .with_timeout_ms(timeout_ms)
        .with_validate_only(false);

    let response: CreateTopicsResponse = client.send_request(ApiKey::CreateTopics, request).await?;

    let result = response
        .topics
        .iter()
        .find(|t| t.name.as_str() == topic)
        .ok_or_else(|| KafkaError::Protocol(format!("No result for topic '{}'", topic)))?;

    let message = result.error_message.as_ref().map(|s| s.to_string());
    classify(topic, result.error_code, message)
}

fn classify(topic: &str, error_code: i16, message: Option<String>) -> Result<CreateOutcome> {
    match error_code {
        0 => {
            info!("Created topic: {}", topic);
            Ok(CreateOutcome::Created)
        }
        TOPIC_ALREADY_EXISTS => {
            debug!("Topic already exists: {}", topic);
            Ok(CreateOutcome::AlreadyExists)
        }
        code => Err(KafkaError::BrokerError {
            code,
            message: format!(
                "Failed to create topic {}: {}",
                topic,
                message.unwrap_or_else(|| "no message".to_string())
            ),
        }
        .into()),
    }
}
