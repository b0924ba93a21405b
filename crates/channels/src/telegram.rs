//! Telegram Bot API webhook updates.

use {
    chrono::{DateTime, Utc},
    homegw_common::{MessageChannel, NormalizedMessage, RawData, constant_time_eq},
    serde::Deserialize,
    serde_json::json,
};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    /// Unix seconds.
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    /// private, group, supergroup or channel
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Normalizer for Telegram webhook deliveries.
#[derive(Debug, Clone, Default)]
pub struct TelegramNormalizer {
    webhook_secret: Option<String>,
}

impl TelegramNormalizer {
    /// `webhook_secret` is the value Telegram echoes in
    /// `X-Telegram-Bot-Api-Secret-Token`. Empty or `None` disables the check.
    #[must_use]
    pub fn new(webhook_secret: Option<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }

    /// Check the secret-token header of an inbound webhook request.
    pub fn verify_secret(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = self.webhook_secret.as_deref() else {
            return Ok(());
        };
        match provided {
            Some(token) if constant_time_eq(token, expected) => Ok(()),
            Some(_) => Err(Error::unauthorized("webhook secret token mismatch")),
            None => Err(Error::unauthorized("missing webhook secret token")),
        }
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedMessage> {
        let update: TelegramUpdate = serde_json::from_slice(raw)
            .map_err(|e| Error::invalid_input(format!("malformed telegram update: {e}")))?;
        normalize_update(update)
    }
}

/// Convert one update into a message. Only text messages are supported.
pub fn normalize_update(update: TelegramUpdate) -> Result<NormalizedMessage> {
    let Some(msg) = update.message else {
        return Err(Error::invalid_input(
            "unsupported telegram update (no message)",
        ));
    };
    let text = msg.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(Error::invalid_input("empty or non-text telegram message"));
    }

    let mut raw = RawData::new();
    raw.insert("update_id".into(), json!(update.update_id));
    raw.insert("message_id".into(), json!(msg.message_id));
    raw.insert("chat_type".into(), json!(msg.chat.kind));

    let mut normalized = NormalizedMessage::new(text, MessageChannel::Telegram)?
        .with_chat_id(msg.chat.id.to_string());
    if let Some(from) = &msg.from {
        raw.insert(
            "from_username".into(),
            json!(from.username.clone().unwrap_or_default()),
        );
        raw.insert("from_name".into(), json!(display_name(from)));
        normalized = normalized.with_user_id(from.id.to_string());
    }
    if let Some(ts) = DateTime::<Utc>::from_timestamp(msg.date, 0).filter(|_| msg.date > 0) {
        normalized = normalized.with_timestamp(ts);
    }

    Ok(normalized.with_raw_data(raw))
}

fn display_name(user: &TelegramUser) -> String {
    match user.last_name.as_deref() {
        Some(last) if !last.is_empty() => format!("{} {last}", user.first_name),
        _ => user.first_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATE: &str = r#"{
        "update_id": 1001,
        "message": {
            "message_id": 7,
            "from": {"id": 42, "is_bot": false, "first_name": "Ada", "last_name": "L", "username": "ada"},
            "chat": {"id": -100, "type": "group"},
            "date": 1700000000,
            "text": " turn on the kitchen light "
        }
    }"#;

    #[test]
    fn normalizes_text_message() {
        let msg = TelegramNormalizer::default()
            .normalize(UPDATE.as_bytes())
            .unwrap();
        assert_eq!(msg.text(), "turn on the kitchen light");
        assert_eq!(msg.channel(), MessageChannel::Telegram);
        assert_eq!(msg.channel_user_id(), Some("42"));
        assert_eq!(msg.channel_chat_id(), Some("-100"));
        assert_eq!(msg.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(msg.raw_data()["from_name"], "Ada L");
        assert_eq!(msg.raw_data()["chat_type"], "group");
        assert_eq!(msg.raw_data()["update_id"], 1001);
    }

    #[test]
    fn update_without_message_is_rejected() {
        let err = TelegramNormalizer::default()
            .normalize(br#"{"update_id": 1}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn non_text_message_is_rejected() {
        let raw = br#"{"update_id":1,"message":{"message_id":1,"chat":{"id":1,"type":"private"},"date":0}}"#;
        assert!(matches!(
            TelegramNormalizer::default().normalize(raw),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        assert!(matches!(
            TelegramNormalizer::default().normalize(b"not json"),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn secret_check() {
        let open = TelegramNormalizer::new(Some(String::new()));
        assert!(open.verify_secret(None).is_ok());

        let guarded = TelegramNormalizer::new(Some("s3cret".into()));
        assert!(guarded.verify_secret(Some("s3cret")).is_ok());
        assert!(matches!(
            guarded.verify_secret(Some("nope")),
            Err(Error::Unauthorized { .. })
        ));
        assert!(guarded.verify_secret(None).is_err());
    }
}
