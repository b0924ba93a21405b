//! Channel-agnostic message representation.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Opaque per-channel payload carried alongside a message.
pub type RawData = serde_json::Map<String, serde_json::Value>;

/// Inbound channel a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Http,
    Telegram,
    WechatWork,
    Websocket,
}

impl MessageChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Telegram => "telegram",
            Self::WechatWork => "wechat_work",
            Self::Websocket => "websocket",
        }
    }
}

impl fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Self::Http),
            "telegram" => Ok(Self::Telegram),
            "wechat_work" | "wechat-work" | "wecom" => Ok(Self::WechatWork),
            "websocket" | "ws" => Ok(Self::Websocket),
            other => Err(Error::invalid_input(format!("unknown channel: {other}"))),
        }
    }
}

/// A normalized inbound command.
///
/// Built once by a channel normalizer and never mutated afterwards; the
/// fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    text: String,
    channel: MessageChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_chat_id: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    raw_data: RawData,
}

impl NormalizedMessage {
    /// Create a message, rejecting empty or whitespace-only text.
    pub fn new(text: impl Into<String>, channel: MessageChannel) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_input("message text must not be empty"));
        }
        Ok(Self {
            text: trimmed.to_string(),
            channel,
            channel_user_id: None,
            channel_chat_id: None,
            timestamp: Utc::now(),
            raw_data: RawData::new(),
        })
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.channel_user_id = non_empty(user_id.into());
        self
    }

    #[must_use]
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.channel_chat_id = non_empty(chat_id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_raw_data(mut self, raw_data: RawData) -> Self {
        self.raw_data = raw_data;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn channel(&self) -> MessageChannel {
        self.channel
    }

    pub fn channel_user_id(&self) -> Option<&str> {
        self.channel_user_id.as_deref()
    }

    pub fn channel_chat_id(&self) -> Option<&str> {
        self.channel_chat_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn raw_data(&self) -> &RawData {
        &self.raw_data
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn rejects_empty_text() {
        assert!(matches!(
            NormalizedMessage::new("", MessageChannel::Http),
            Err(Error::InvalidInput(_))
        ));
        assert!(NormalizedMessage::new("   \n", MessageChannel::Http).is_err());
    }

    #[test]
    fn trims_text_and_drops_blank_ids() {
        let msg = NormalizedMessage::new("  turn on the light ", MessageChannel::Telegram)
            .unwrap()
            .with_user_id("42")
            .with_chat_id("");
        assert_eq!(msg.text(), "turn on the light");
        assert_eq!(msg.channel_user_id(), Some("42"));
        assert_eq!(msg.channel_chat_id(), None);
    }

    #[rstest]
    #[case("http", MessageChannel::Http)]
    #[case("", MessageChannel::Http)]
    #[case("Telegram", MessageChannel::Telegram)]
    #[case("wechat-work", MessageChannel::WechatWork)]
    #[case("ws", MessageChannel::Websocket)]
    fn parses_channel_names(#[case] input: &str, #[case] expected: MessageChannel) {
        assert_eq!(input.parse::<MessageChannel>().unwrap(), expected);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert!("carrier-pigeon".parse::<MessageChannel>().is_err());
    }

    #[test]
    fn channel_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageChannel::WechatWork).unwrap(),
            "\"wechat_work\""
        );
    }
}
