//! Inbound chat-channel webhooks.

use std::sync::Arc;

use {
    axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    bytes::Bytes,
    homegw_channels::{ChannelNormalizer, Error as ChannelError},
    homegw_common::NormalizedMessage,
    homegw_protocol::TELEGRAM_SECRET_HEADER,
    tracing::{debug, info, warn},
};

use crate::{server::AppState, state::GatewayState};

/// `POST /api/v1/webhook/telegram`
///
/// Answers at once and runs the command in the background; the outcome is
/// sent back to the chat. Payloads that carry no text command are
/// acknowledged with 200 so Telegram does not redeliver them.
pub async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(telegram) = state.gateway.telegram.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"ok": false, "error": "telegram channel is disabled"})),
        )
            .into_response();
    };

    let provided = headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = telegram.inbound.authenticate(provided) {
        warn!(error = %e, "telegram webhook rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        )
            .into_response();
    }

    let message = match telegram.inbound.normalize(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "telegram update ignored");
            return Json(serde_json::json!({"ok": false, "error": e.to_string()})).into_response();
        },
    };

    let gateway = Arc::clone(&state.gateway);
    tokio::spawn(async move {
        process_telegram_message(gateway, message).await;
    });
    Json(serde_json::json!({"ok": true})).into_response()
}

async fn process_telegram_message(gateway: Arc<GatewayState>, message: NormalizedMessage) {
    let deadline = tokio::time::Instant::now() + gateway.request_timeout;
    let outcome = gateway.orchestrator.submit(&message, Some(deadline)).await;

    let Some(telegram) = gateway.telegram.as_ref() else {
        return;
    };
    let (Some(outbound), Some(chat_id)) = (telegram.outbound.as_ref(), message.channel_chat_id())
    else {
        info!(
            trace_id = outcome.trace_id(),
            status = ?outcome.status(),
            "telegram outcome not sent (no bot token or chat id)"
        );
        return;
    };
    if let Err(e) = outbound.send_text(chat_id, &outcome.reply_text()).await {
        warn!(trace_id = outcome.trace_id(), chat_id, error = %e, "telegram reply failed");
    }
}

/// `POST /api/v1/webhook/wechat-work`
pub async fn wechat_work_webhook(body: Bytes) -> Response {
    let error = match ChannelNormalizer::WechatWork.normalize(&body) {
        Ok(_) => return StatusCode::ACCEPTED.into_response(),
        Err(e) => e,
    };
    let status = match error {
        ChannelError::Unavailable { .. } => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": error.to_string()})),
    )
        .into_response()
}
