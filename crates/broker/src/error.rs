use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    /// No reply arrived in time. Never retried by the broker.
    #[error("no response for trace {trace_id} within {}ms", timeout.as_millis())]
    Timeout { trace_id: String, timeout: Duration },

    #[error("failed to encode dispatch request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("response subscription closed")]
    SubscriptionClosed,

    #[error("trace {0} already has a pending dispatch")]
    DuplicateTrace(String),
}

impl Error {
    pub fn publish(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }

    pub fn subscribe(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
