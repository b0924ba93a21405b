//! Channel normalizers.
//!
//! Every inbound payload is turned into a [`NormalizedMessage`] by exactly one
//! variant of [`ChannelNormalizer`], chosen by the channel identifier at the
//! HTTP boundary.

use {
    homegw_common::{MessageChannel, NormalizedMessage},
    homegw_protocol::{CommandRequest, MAX_COMMAND_TEXT_BYTES},
};

use crate::{
    error::{Error, Result},
    telegram::TelegramNormalizer,
};

/// User id recorded for HTTP callers that do not identify themselves.
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone)]
pub enum ChannelNormalizer {
    /// JSON `CommandRequest` body.
    Http,
    /// Telegram Bot API update.
    Telegram(TelegramNormalizer),
    /// Accepted in configuration, not implemented.
    WechatWork,
    /// A text frame: either a JSON `CommandRequest` or the bare command text.
    Websocket,
}

impl ChannelNormalizer {
    #[must_use]
    pub fn channel(&self) -> MessageChannel {
        match self {
            Self::Http => MessageChannel::Http,
            Self::Telegram(_) => MessageChannel::Telegram,
            Self::WechatWork => MessageChannel::WechatWork,
            Self::Websocket => MessageChannel::Websocket,
        }
    }

    /// Check the channel's request credential. Only Telegram carries one.
    pub fn authenticate(&self, provided: Option<&str>) -> Result<()> {
        match self {
            Self::Telegram(telegram) => telegram.verify_secret(provided),
            Self::Http | Self::WechatWork | Self::Websocket => Ok(()),
        }
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedMessage> {
        match self {
            Self::Http => {
                let req: CommandRequest = serde_json::from_slice(raw)
                    .map_err(|e| Error::invalid_input(format!("malformed request body: {e}")))?;
                from_command_request(req, MessageChannel::Http)
            },
            Self::Telegram(telegram) => telegram.normalize(raw),
            Self::WechatWork => Err(Error::unavailable("wechat_work channel is not implemented")),
            Self::Websocket => {
                let text = std::str::from_utf8(raw)
                    .map_err(|_| Error::invalid_input("frame is not valid UTF-8"))?;
                match serde_json::from_str::<CommandRequest>(text) {
                    Ok(req) => from_command_request(req, MessageChannel::Websocket),
                    Err(_) if !text.trim_start().starts_with('{') => {
                        check_length(text)?;
                        Ok(NormalizedMessage::new(text, MessageChannel::Websocket)?)
                    },
                    Err(e) => Err(Error::invalid_input(format!("malformed frame: {e}"))),
                }
            },
        }
    }
}

/// Build a message from an already-decoded API body.
///
/// `default_channel` applies when the body names no channel. HTTP callers
/// without a user id are recorded as [`ANONYMOUS_USER`].
pub fn from_command_request(
    req: CommandRequest,
    default_channel: MessageChannel,
) -> Result<NormalizedMessage> {
    let channel = match req.channel.as_deref() {
        Some(name) => name.parse::<MessageChannel>()?,
        None => default_channel,
    };
    check_length(&req.text)?;

    let user_id = req
        .user_id
        .filter(|u| !u.trim().is_empty())
        .or_else(|| (channel == MessageChannel::Http).then(|| ANONYMOUS_USER.to_string()));

    let mut msg = NormalizedMessage::new(req.text, channel)?.with_raw_data(req.raw_data);
    if let Some(user_id) = user_id {
        msg = msg.with_user_id(user_id);
    }
    if let Some(chat_id) = req.chat_id {
        msg = msg.with_chat_id(chat_id);
    }
    Ok(msg)
}

fn check_length(text: &str) -> Result<()> {
    if text.len() > MAX_COMMAND_TEXT_BYTES {
        return Err(Error::invalid_input(format!(
            "message text exceeds {MAX_COMMAND_TEXT_BYTES} bytes"
        )));
    }
    Ok(())
}
