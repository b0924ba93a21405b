//! In-process pub/sub bus.
//!
//! Each topic is a `tokio::sync::broadcast` channel created on first use.
//! Subscribers only see payloads published after they subscribed, and a
//! subscriber that falls more than the channel capacity behind skips the
//! overflow.

use {
    async_trait::async_trait,
    bytes::Bytes,
    dashmap::DashMap,
    futures::StreamExt,
    tokio::sync::broadcast,
    tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    transport::{PayloadStream, PubSubTransport},
};

const DEFAULT_TOPIC_CAPACITY: usize = 256;

pub struct MemoryBus {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Drop a topic, ending every subscription on it.
    pub fn close(&self, topic: &str) {
        if self.topics.remove(topic).is_some() {
            debug!(topic, "memory bus topic closed");
        }
    }
}

#[async_trait]
impl PubSubTransport for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<()> {
        let bytes = payload.len();
        match self.sender(topic).send(payload) {
            Ok(receivers) => debug!(topic, key, bytes, receivers, "published"),
            Err(_) => debug!(topic, key, bytes, "published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let payload = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "subscriber lagged, payloads dropped");
                    None
                },
            };
            futures::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}
