//! Command submission over a WebSocket: each text frame is one command and
//! is answered with one `CommandResponse` frame, in order.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    bytes::Bytes,
    futures::{SinkExt, stream::StreamExt},
    homegw_channels::ChannelNormalizer,
    tracing::{debug, info, warn},
};

use crate::{outcome::CommandOutcome, state::GatewayState};

pub async fn handle_client(socket: WebSocket, gateway: Arc<GatewayState>, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, remote = %remote_addr, "ws: client connected");

    let (mut tx, mut rx) = socket.split();
    while let Some(frame) = rx.next().await {
        let raw = match frame {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        let outcome = match ChannelNormalizer::Websocket.normalize(&raw) {
            Ok(message) => {
                let deadline = tokio::time::Instant::now() + gateway.request_timeout;
                gateway.orchestrator.submit(&message, Some(deadline)).await
            },
            Err(e) => {
                let outcome = CommandOutcome::rejected(e.to_string());
                info!(conn_id = %conn_id, trace_id = outcome.trace_id(), reason = %e, "ws: command rejected");
                outcome
            },
        };

        let payload = match serde_json::to_string(&outcome.to_response()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(conn_id = %conn_id, trace_id = outcome.trace_id(), error = %e, "ws: encode failed");
                continue;
            },
        };
        if tx.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }

    info!(conn_id = %conn_id, "ws: client disconnected");
}
