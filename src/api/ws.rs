use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::state::AppState;

/// `ws://host:port/ws/{sessionId}` — the worker's push channel. Inbound
/// frames are heartbeats only; their content is ignored. On close, access is
/// released and the channel is detached (spec §4.F).
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(session_id) = session_id.parse() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.registry.get(session_id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: crate::types::SessionId) {
    if let Err(e) = state.registry.attach_channel(session_id) {
        warn!(%session_id, "channel attach rejected: {e}");
        return;
    }
    let mut rx = state.hub.register(session_id);
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&notification) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            _ => {
                state.registry.touch(session_id);
                let _ = state.coordinator.heartbeat(session_id).await;
            }
        }
    }

    send_task.abort();
    info!(%session_id, "push channel closed");
    state.hub.unregister(session_id);
    state.registry.detach_channel(session_id);
    let _ = state.coordinator.release_access(session_id, "disconnected").await;
}
