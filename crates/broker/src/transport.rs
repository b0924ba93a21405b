use {async_trait::async_trait, bytes::Bytes, futures::stream::BoxStream};

use crate::error::Result;

/// Payloads received on one subscription. The stream ending means the
/// subscription is gone for good.
pub type PayloadStream = BoxStream<'static, Bytes>;

/// Topic-based publish/subscribe with at-least-once delivery.
///
/// `key` is the partition key; all messages sharing a key land in one
/// partition on partitioned transports.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream>;
}
