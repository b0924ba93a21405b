//! Outbound replies to channel users.

use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Telegram's per-message size limit, in bytes.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Send plain-text replies to a channel conversation.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;
}

/// Sends replies with the Bot API `sendMessage` method.
pub struct TelegramOutbound {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: Secret<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramOutbound {
    pub fn new(
        api_base_url: impl Into<String>,
        bot_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::external("build telegram http client", e))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base_url,
            self.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl ChannelOutbound for TelegramOutbound {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let chat_id: i64 = to
            .parse()
            .map_err(|_| Error::invalid_input(format!("invalid telegram chat id: {to}")))?;

        for chunk in chunk_message(text, TELEGRAM_MAX_MESSAGE_LEN) {
            let resp = self
                .client
                .post(self.method_url("sendMessage"))
                .json(&serde_json::json!({ "chat_id": chat_id, "text": chunk }))
                .send()
                .await
                .map_err(|e| Error::external("telegram sendMessage", e.without_url()))?;

            let status = resp.status();
            let body: ApiResponse = resp
                .json()
                .await
                .map_err(|e| Error::external("telegram sendMessage response", e.without_url()))?;
            if !status.is_success() || !body.ok {
                let description = body.description.unwrap_or_else(|| status.to_string());
                warn!(chat_id, %status, %description, "telegram sendMessage failed");
                return Err(Error::unavailable(format!(
                    "telegram sendMessage failed: {description}"
                )));
            }
            debug!(chat_id, bytes = chunk.len(), "telegram reply sent");
        }
        Ok(())
    }
}

/// Split text into chunks that fit within `max_len` bytes.
/// Tries to split at newlines or spaces to avoid breaking words.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window_end = remaining.floor_char_boundary(max_len);
        if window_end == 0 {
            window_end = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let slice = &remaining[..window_end];
        let split_at = match slice.rfind('\n').or_else(|| slice.rfind(' ')) {
            Some(0) | None => window_end,
            Some(at) => at,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
        if let Some(rest) = remaining.strip_prefix(' ') {
            remaining = rest;
        }
    }

    chunks
}
