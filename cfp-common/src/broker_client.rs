//! HTTP client for the cfp-broker service
//!
//! Implements `Publisher` and `Subscriber` on top of the broker's
//! `POST /topics/:topic` and `GET /topics/:topic/events` (SSE) endpoints,
//! so callers can swap the in-process `TopicBus` for a remote broker.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bus::{validate_topic, Inbound, InboundEvent, Publisher, Subscriber};
use crate::sse::{SseReader, KEEP_ALIVE_INTERVAL, LAGGED_EVENT};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("cfp/", env!("CARGO_PKG_VERSION"));

/// A subscription with no bytes for this long is treated as closed
pub const SUBSCRIPTION_IDLE_TIMEOUT: Duration =
    Duration::from_secs(KEEP_ALIVE_INTERVAL.as_secs() * 2);

/// `POST /topics/:topic` response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub topic: String,
    pub subscribers: usize,
}

/// Broker API client
#[derive(Clone)]
pub struct BrokerClient {
    http_client: reqwest::Client,
    base_url: String,
    publish_timeout: Duration,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, publish_timeout: Duration) -> Result<Self> {
        // No overall timeout: subscriptions are long-lived streams
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::BroadcastUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            publish_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }
}

#[async_trait]
impl Publisher for BrokerClient {
    async fn publish(&self, topic: &str, payload: String) -> Result<usize> {
        validate_topic(topic)?;

        let response = self
            .http_client
            .post(self.topic_url(topic))
            .timeout(self.publish_timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::BroadcastUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BroadcastUnavailable(format!(
                "broker returned {}: {}",
                status, body
            )));
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::BroadcastUnavailable(e.to_string()))?;

        debug!(topic, subscribers = published.subscribers, "Published to broker");
        Ok(published.subscribers)
    }
}

#[async_trait]
impl Subscriber for BrokerClient {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Inbound>> {
        validate_topic(topic)?;

        let url = format!("{}/events", self.topic_url(topic));
        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::BroadcastUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::BroadcastUnavailable(format!(
                "subscribe to {} failed: {}",
                topic, status
            )));
        }

        debug!(topic, url = %url, "Subscribed to broker");
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Box::new(SseSubscription::new(chunks)))
    }
}

/// Subscription backed by an SSE response body
///
/// The broker sends keep-alive comments, so a body that stays silent past the
/// idle timeout is a dead connection and ends the subscription.
pub struct SseSubscription {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    reader: SseReader,
    idle_timeout: Duration,
    last_chunk: Instant,
    closed: bool,
}

impl SseSubscription {
    pub fn new(chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> Self {
        Self::with_idle_timeout(chunks, SUBSCRIPTION_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            chunks,
            reader: SseReader::default(),
            idle_timeout,
            last_chunk: Instant::now(),
            closed: false,
        }
    }
}

#[async_trait]
impl Inbound for SseSubscription {
    async fn recv(&mut self) -> InboundEvent {
        loop {
            if let Some(msg) = self.reader.next_event() {
                match msg.event.as_deref() {
                    Some(LAGGED_EVENT) => match msg.data.trim().parse::<u64>() {
                        Ok(n) => return InboundEvent::Lagged(n),
                        Err(_) => {
                            warn!(data = %msg.data, "Unparseable lag report");
                            continue;
                        }
                    },
                    // Unnamed events default to "message" in SSE
                    None | Some(crate::sse::MESSAGE_EVENT) => {
                        return InboundEvent::Message(msg.data)
                    }
                    Some(other) => {
                        debug!(event = other, "Ignoring SSE event");
                        continue;
                    }
                }
            }

            if self.reader.is_overflowed() && !self.closed {
                warn!("Broker stream sent an oversized line");
                self.closed = true;
            }
            if self.closed {
                return InboundEvent::Closed;
            }

            // Deadline is anchored to the last chunk so a dropped recv() does not extend it
            let deadline = self.last_chunk + self.idle_timeout;
            match tokio::time::timeout_at(deadline, self.chunks.next()).await {
                Ok(Some(Ok(bytes))) => {
                    self.last_chunk = Instant::now();
                    self.reader.push(&bytes);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Broker stream error");
                    self.closed = true;
                }
                Ok(None) => {
                    debug!("Broker stream ended");
                    self.closed = true;
                }
                Err(_) => {
                    warn!(
                        idle_secs = self.idle_timeout.as_secs(),
                        "Broker stream went silent"
                    );
                    self.closed = true;
                }
            }
        }
    }
}
