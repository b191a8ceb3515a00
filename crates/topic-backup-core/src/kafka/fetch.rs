//! Kafka Fetch and ListOffsets APIs.

use bytes::Bytes;
use kafka_protocol::messages::fetch_request::{FetchPartition, FetchTopic};
use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::{
    ApiKey, BrokerId, FetchRequest, FetchResponse, ListOffsetsRequest, ListOffsetsResponse,
    TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{Compression, RecordBatchDecoder, TimestampType as WireTimestampType};
use tracing::{debug, trace};

use super::KafkaClient;
use crate::cluster::FetchBatch;
use crate::error::KafkaError;
use crate::record::{Record, RecordHeader, TimestampType};
use crate::Result;

/// ListOffsets sentinel for the log start offset
const EARLIEST_TIMESTAMP: i64 = -2;
/// ListOffsets sentinel for the high watermark
const LATEST_TIMESTAMP: i64 = -1;

/// Fetch records from a topic/partition starting at `offset`.
///
/// Control records are dropped, but still advance `next_offset`.
pub async fn fetch(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    offset: i64,
    max_bytes: i32,
) -> Result<FetchBatch> {
    let fetch_partition = FetchPartition::default()
        .with_partition(partition)
        .with_fetch_offset(offset)
        .with_partition_max_bytes(max_bytes)
        .with_log_start_offset(-1);

    let fetch_topic = FetchTopic::default()
        .with_topic(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partitions(vec![fetch_partition]);

    let request = FetchRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_max_wait_ms(500)
        .with_min_bytes(1)
        .with_max_bytes(max_bytes)
        .with_isolation_level(0)
        .with_topics(vec![fetch_topic]);

    let response: FetchResponse = client.send_request(ApiKey::Fetch, request).await?;

    let mut batch = FetchBatch {
        records: Vec::new(),
        next_offset: offset,
    };

    let partition_response = response
        .responses
        .iter()
        .filter(|t| t.topic.as_str() == topic)
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition)
        .ok_or_else(|| KafkaError::PartitionNotAvailable {
            topic: topic.to_string(),
            partition,
        })?;

    if partition_response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!(
                "Fetch error for {}:{}: code {}",
                topic, partition, partition_response.error_code
            ),
        }
        .into());
    }

    if let Some(data) = partition_response.records.as_ref().filter(|d| !d.is_empty()) {
        for record in decode_records(data)? {
            // Batches are returned whole and may start before the requested offset
            if record.offset < offset {
                continue;
            }
            batch.next_offset = record.offset + 1;
            if record.control {
                continue;
            }
            batch.records.push(convert_record(record, partition));
        }
    }

    trace!(
        "Fetched {} records from {}:{} starting at offset {}",
        batch.records.len(),
        topic,
        partition,
        offset
    );

    Ok(batch)
}

fn decode_records(data: &Bytes) -> Result<Vec<kafka_protocol::records::Record>> {
    let mut buf = data.clone();
    RecordBatchDecoder::decode::<_, fn(&mut Bytes, Compression) -> anyhow::Result<Bytes>>(
        &mut buf,
    )
    .map_err(|e| KafkaError::Protocol(format!("Failed to decode records: {:?}", e)).into())
}

fn convert_record(record: kafka_protocol::records::Record, partition: i32) -> Record {
    let headers = record
        .headers
        .into_iter()
        .map(|(key, value)| RecordHeader {
            key: key.to_string(),
            value,
        })
        .collect();

    Record {
        key: record.key,
        value: record.value,
        headers,
        timestamp: record.timestamp,
        timestamp_type: match record.timestamp_type {
            WireTimestampType::Creation => TimestampType::CreateTime,
            WireTimestampType::LogAppend => TimestampType::LogAppendTime,
        },
        offset: record.offset,
        partition,
    }
}

/// Earliest and latest offsets of a partition
pub async fn get_offsets(client: &KafkaClient, topic: &str, partition: i32) -> Result<(i64, i64)> {
    let earliest = list_offset(client, topic, partition, EARLIEST_TIMESTAMP).await?;
    let latest = list_offset(client, topic, partition, LATEST_TIMESTAMP).await?;

    debug!(
        "Offsets for {}:{}: earliest={}, latest={}",
        topic, partition, earliest, latest
    );

    Ok((earliest, latest))
}

async fn list_offset(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    timestamp: i64,
) -> Result<i64> {
    let list_topic = ListOffsetsTopic::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partitions(vec![ListOffsetsPartition::default()
            .with_partition_index(partition)
            .with_timestamp(timestamp)]);

    let request = ListOffsetsRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_isolation_level(0)
        .with_topics(vec![list_topic]);

    let response: ListOffsetsResponse = client.send_request(ApiKey::ListOffsets, request).await?;

    let partition_response = response
        .topics
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition)
        .ok_or_else(|| KafkaError::PartitionNotAvailable {
            topic: topic.to_string(),
            partition,
        })?;

    if partition_response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!(
                "ListOffsets error for {}:{}: code {}",
                topic, partition, partition_response.error_code
            ),
        }
        .into());
    }

    Ok(partition_response.offset)
}
