//! Topic bus for named, multi-subscriber broadcast
//!
//! Provides the in-process Broadcast Channel and the traits both the in-process
//! bus and the HTTP broker client implement.
//!
//! Delivery is at-most-once with no persistence:
//! - A subscriber only sees messages published after it subscribed
//! - Each subscriber has a bounded buffer; on overflow the oldest messages are
//!   dropped and the subscriber receives `InboundEvent::Lagged(n)` once
//! - No acknowledgement, no redelivery

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Default per-subscriber buffer size
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Longest accepted topic name
const MAX_TOPIC_LEN: usize = 64;

/// One item pulled from a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Opaque payload as published
    Message(String),
    /// Number of messages dropped because this subscriber fell behind
    Lagged(u64),
    /// Subscription ended (bus dropped or connection closed)
    Closed,
}

/// Write side of a broadcast channel
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a payload; returns the number of subscribers it was handed to
    async fn publish(&self, topic: &str, payload: String) -> Result<usize>;
}

/// Read side of a broadcast channel
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Inbound>>;
}

/// An active subscription
#[async_trait]
pub trait Inbound: Send {
    /// Wait for the next event. Cancel-safe: dropping the future loses nothing.
    async fn recv(&mut self) -> InboundEvent;
}

/// Check a topic name: 1-64 chars of `[A-Za-z0-9_.-]`
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidInput(format!(
            "topic name must be 1-{} characters",
            MAX_TOPIC_LEN
        )));
    }
    if !topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::InvalidInput(format!("invalid topic name: {}", topic)));
    }
    Ok(())
}

/// Check a payload can be carried in SSE `data:` lines
///
/// A carriage return cannot be framed by the SSE encoder. Line feeds are fine;
/// they become multiple `data:` lines and are rejoined by the reader.
pub fn validate_payload(payload: &str) -> Result<()> {
    if payload.contains('\r') {
        return Err(Error::InvalidInput(
            "payload must not contain carriage returns".to_string(),
        ));
    }
    Ok(())
}

// ========================================
// TopicBus Implementation
// ========================================

/// In-process broadcast bus keyed by topic name
///
/// Uses one `tokio::broadcast` channel per topic. Topics are created on first
/// subscribe and forgotten once a publish finds no receivers left.
///
/// # Examples
///
/// ```
/// use cfp_common::bus::TopicBus;
///
/// let bus = TopicBus::new(16);
/// let mut rx = bus.subscribe_local("predictions");
///
/// assert_eq!(bus.publish_local("predictions", "{}".to_string()), 1);
/// assert_eq!(rx.try_recv().unwrap(), "{}");
/// ```
#[derive(Clone)]
pub struct TopicBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl TopicBus {
    /// Creates a bus whose subscribers each buffer up to `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future messages on `topic`
    pub fn subscribe_local(&self, topic: &str) -> broadcast::Receiver<String> {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(topic, subscribers = tx.receiver_count() + 1, "New topic subscriber");
        tx.subscribe()
    }

    /// Publish to `topic`, returning how many subscribers received it
    ///
    /// Publishing to a topic nobody listens to is not an error; the message
    /// is simply dropped.
    pub fn publish_local(&self, topic: &str, payload: String) -> usize {
        let delivered = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            match topics.get(topic) {
                Some(tx) => tx.send(payload).unwrap_or(0),
                None => 0,
            }
        };

        if delivered == 0 {
            self.prune(topic);
        }
        trace!(topic, delivered, "Published");
        delivered
    }

    /// Current subscriber count for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Snapshot of known topics with their subscriber counts, sorted by name
    pub fn topics(&self) -> Vec<(String, usize)> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<(String, usize)> = topics
            .iter()
            .map(|(name, tx)| (name.clone(), tx.receiver_count()))
            .collect();
        list.sort();
        list
    }

    /// Get the configured per-subscriber buffer size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(topic);
            debug!(topic, "Dropped topic with no subscribers");
        }
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[async_trait]
impl Publisher for TopicBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<usize> {
        validate_topic(topic)?;
        Ok(self.publish_local(topic, payload))
    }
}

#[async_trait]
impl Subscriber for TopicBus {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Inbound>> {
        validate_topic(topic)?;
        Ok(Box::new(LocalSubscription::new(self.subscribe_local(topic))))
    }
}

/// Subscription on an in-process `TopicBus`
pub struct LocalSubscription {
    rx: broadcast::Receiver<String>,
}

impl LocalSubscription {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl Inbound for LocalSubscription {
    async fn recv(&mut self) -> InboundEvent {
        match self.rx.recv().await {
            Ok(payload) => InboundEvent::Message(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => InboundEvent::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => InboundEvent::Closed,
        }
    }
}
