//! Kafka Produce API.

use bytes::BytesMut;
use indexmap::IndexMap;
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{ApiKey, ProduceRequest, ProduceResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, RecordBatchEncoder, RecordEncodeOptions, TimestampType as WireTimestampType,
    NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE,
};
use tracing::trace;

use super::KafkaClient;
use crate::error::KafkaError;
use crate::record::{Record, TimestampType};
use crate::Result;

/// Produce records to a topic/partition, waiting for all in-sync replicas.
///
/// A request carries one batch per partition and a batch has a single
/// timestamp type, so records are sent in runs of equal timestamp type.
/// Returns the base offset of the last run.
pub async fn produce(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    records: &[Record],
    timeout_ms: i32,
) -> Result<i64> {
    let mut base_offset = -1;
    let mut start = 0;
    while start < records.len() {
        let timestamp_type = records[start].timestamp_type;
        let end = records[start..]
            .iter()
            .position(|r| r.timestamp_type != timestamp_type)
            .map_or(records.len(), |n| start + n);
        base_offset =
            produce_batch(client, topic, partition, &records[start..end], timeout_ms).await?;
        start = end;
    }
    Ok(base_offset)
}

async fn produce_batch(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    records: &[Record],
    timeout_ms: i32,
) -> Result<i64> {
    let records_bytes = encode_batch(records)?;

    let partition_data = PartitionProduceData::default()
        .with_index(partition)
        .with_records(Some(records_bytes));

    let topic_data = TopicProduceData::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partition_data(vec![partition_data]);

    let request = ProduceRequest::default()
        .with_acks(-1)
        .with_timeout_ms(timeout_ms)
        .with_topic_data(vec![topic_data]);

    let response: ProduceResponse = client.send_request(ApiKey::Produce, request).await?;

    let partition_response = response
        .responses
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partition_responses.iter())
        .find(|p| p.index == partition)
        .ok_or_else(|| {
            KafkaError::Protocol("No partition response in produce response".to_string())
        })?;

    if partition_response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!(
                "Produce error for {}:{}: code {}",
                topic, partition, partition_response.error_code
            ),
        }
        .into());
    }

    trace!(
        "Produced {} records to {}:{} at offset {}",
        records.len(),
        topic,
        partition,
        partition_response.base_offset
    );

    Ok(partition_response.base_offset)
}

/// Encode records as one uncompressed v2 record batch
fn encode_batch(records: &[Record]) -> Result<bytes::Bytes> {
    let wire_records: Vec<kafka_protocol::records::Record> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let headers: IndexMap<StrBytes, Option<bytes::Bytes>> = r
                .headers
                .iter()
                .map(|h| (StrBytes::from_string(h.key.clone()), h.value.clone()))
                .collect();

            kafka_protocol::records::Record {
                transactional: false,
                control: false,
                partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
                producer_id: NO_PRODUCER_ID,
                producer_epoch: NO_PRODUCER_EPOCH,
                timestamp_type: match r.timestamp_type {
                    TimestampType::CreateTime => WireTimestampType::Creation,
                    TimestampType::LogAppendTime => WireTimestampType::LogAppend,
                },
                // Relative offset; the broker assigns the real one
                offset: i as i64,
                sequence: NO_SEQUENCE,
                timestamp: r.timestamp,
                key: r.key.clone(),
                value: r.value.clone(),
                headers,
            }
        })
        .collect();

    let options = RecordEncodeOptions {
        version: 2,
        compression: Compression::None,
    };

    let mut buf = BytesMut::new();
    RecordBatchEncoder::encode::<_, _, fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>>(&mut buf, wire_records.iter(), &options)
        .map_err(|e| KafkaError::Protocol(format!("Failed to encode records: {:?}", e)))?;

    Ok(buf.freeze())
}
