//! Connection to a single broker speaking the Kafka wire protocol.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::protocol::{Decodable, Encodable};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::KafkaConfig;
use crate::error::KafkaError;
use crate::Result;

/// Largest response frame accepted from a broker
const MAX_RESPONSE_BYTES: usize = 256 * 1024 * 1024;

/// Plain TCP connection to one broker.
///
/// Requests on one client are serialized; use one client per broker.
pub struct KafkaClient {
    config: KafkaConfig,

    /// Open connection, if any
    connection: Mutex<Option<TcpStream>>,

    /// Address the connection was made to
    address: Mutex<Option<String>>,

    /// Correlation ID counter
    correlation_id: AtomicI32,
}

impl KafkaClient {
    /// Create an unconnected client
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            address: Mutex::new(None),
            correlation_id: AtomicI32::new(1),
        }
    }

    /// Connect to the first reachable bootstrap server
    pub async fn connect(&self) -> Result<()> {
        for server in &self.config.bootstrap_servers {
            match self.connect_to(server).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Failed to connect to {}: {}", server, e),
            }
        }
        Err(KafkaError::NoBrokersAvailable.into())
    }

    /// Connect to a specific broker, retrying with a fixed back-off
    pub async fn connect_to(&self, server: &str) -> Result<()> {
        let attempts = self.config.connect_retries.max(1);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, TcpStream::connect(server)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).map_err(|e| KafkaError::ConnectionFailed {
                        broker: server.to_string(),
                        message: format!("Failed to set TCP_NODELAY: {}", e),
                    })?;
                    *self.connection.lock().await = Some(stream);
                    *self.address.lock().await = Some(server.to_string());
                    debug!("Connected to Kafka broker: {}", server);
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", timeout),
            }

            if attempt < attempts {
                warn!(
                    "Connection attempt {}/{} to {} failed: {}; retrying in {:?}",
                    attempt, attempts, server, last_error, backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(KafkaError::ConnectionFailed {
            broker: server.to_string(),
            message: last_error,
        }
        .into())
    }

    /// Broker address this client is connected to
    pub async fn address(&self) -> Option<String> {
        self.address.lock().await.clone()
    }

    /// Get the next correlation ID
    fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and receive a response
    pub async fn send_request<Req, Resp>(&self, api_key: ApiKey, request: Req) -> Result<Resp>
    where
        Req: Encodable + Default,
        Resp: Decodable + Default,
    {
        let correlation_id = self.next_correlation_id();
        let api_version = api_version(api_key);

        let header = RequestHeader::default()
            .with_request_api_key(api_key as i16)
            .with_request_api_version(api_version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_string(self.config.client_id.clone())));

        let header_version = api_key.request_header_version(api_version);
        let mut buf = BytesMut::new();

        // Reserve space for the length prefix
        buf.put_i32(0);

        header
            .encode(&mut buf, header_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode header: {:?}", e)))?;
        request
            .encode(&mut buf, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode request: {:?}", e)))?;

        let len = (buf.len() - 4) as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        trace!(
            "Sending request: api_key={:?}, api_version={}, correlation_id={}, len={}",
            api_key,
            api_version,
            correlation_id,
            len
        );

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let response_buf = tokio::time::timeout(timeout, self.round_trip(&buf))
            .await
            .map_err(|_| {
                KafkaError::Protocol(format!("{:?} request timed out after {:?}", api_key, timeout))
            })??;

        let mut response_bytes = Bytes::from(response_buf);
        let response_header_version = api_key.response_header_version(api_version);
        let response_header = ResponseHeader::decode(&mut response_bytes, response_header_version)
            .map_err(|e| {
                KafkaError::Protocol(format!("Failed to decode response header: {:?}", e))
            })?;
        if response_header.correlation_id != correlation_id {
            return Err(KafkaError::Protocol(format!(
                "Correlation id mismatch: sent {}, received {}",
                correlation_id, response_header.correlation_id
            ))
            .into());
        }

        let response = Resp::decode(&mut response_bytes, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to decode response: {:?}", e)))?;

        Ok(response)
    }

    async fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut conn = self.connection.lock().await;
        let stream = conn
            .as_mut()
            .ok_or_else(|| KafkaError::Protocol("Not connected".to_string()))?;

        stream
            .write_all(request)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to send request: {}", e)))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response length: {}", e)))?;
        let response_len = i32::from_be_bytes(len_buf);
        if response_len < 0 || response_len as usize > MAX_RESPONSE_BYTES {
            return Err(KafkaError::Protocol(format!(
                "Invalid response length {}",
                response_len
            ))
            .into());
        }

        trace!("Receiving response: len={}", response_len);

        let mut response_buf = vec![0u8; response_len as usize];
        stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response body: {}", e)))?;
        Ok(response_buf)
    }
}

/// API version used for each request type
fn api_version(api_key: ApiKey) -> i16 {
    match api_key {
        // v10 is the first to return topic ids
        ApiKey::Metadata => 10,
        ApiKey::Fetch => 11,
        ApiKey::Produce => 8,
        ApiKey::ListOffsets => 5,
        ApiKey::CreateTopics => 5,
        _ => 0,
    }
}
