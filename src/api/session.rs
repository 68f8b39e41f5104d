use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tracing::info;

use crate::{services::session_registry::resolve_remote_addr, state::AppState};

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// `POST /create_session`
pub async fn create_session(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<Value> {
    let remote_addr = resolve_remote_addr(
        header(&headers, "x-forwarded-for").as_deref(),
        header(&headers, "x-real-ip").as_deref(),
        peer,
    );
    let id = state.registry.create(remote_addr.clone());
    info!(session_id = %id, remote_addr, "session created");
    Json(json!({ "session_id": id.to_string() }))
}
