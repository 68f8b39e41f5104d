use std::collections::HashSet;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    api::error::ApiError,
    state::AppState,
    types::{Decision, QueueReason, SessionId},
};

#[derive(Debug, Deserialize)]
pub struct AccessRequestBody {
    pub session_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub domains: Option<Vec<String>>,
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::malformed_input("invalid session_id"))
}

/// `POST /access/request`
pub async fn request_access(
    State(state): State<AppState>,
    Json(body): Json<AccessRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let session_id = parse_session_id(&body.session_id)?;
    if state.registry.get(session_id).is_none() {
        return Err(ApiError::not_found("unknown session"));
    }
    state.registry.touch(session_id);

    let domains: Option<HashSet<String>> = body.domains.map(|d| d.into_iter().collect());
    let decision = state
        .coordinator
        .request_access(session_id, body.priority, domains)
        .await?;

    let response = match decision {
        Decision::AlreadyActive => json!({
            "granted": true,
            "status": "already_active",
            "message": "session already holds access",
        }),
        Decision::Granted { allocated_domains } => json!({
            "granted": true,
            "status": "granted",
            "allocated_domains": allocated_domains,
            "message": "access granted",
        }),
        Decision::Queued { position, reason } => json!({
            "granted": false,
            "status": "queued",
            "position": position,
            "reason": reason.to_string(),
            "message": "waiting for access",
        }),
        Decision::Conflict { held_by_others } => {
            return Err(ApiError::conflict(format!(
                "requested domains are held by other sessions: {}",
                held_by_others.join(", ")
            )));
        }
    };
    Ok(Json(response))
}

/// `POST /access/release/{session_id}`
pub async fn release_access(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let result = state.coordinator.release_access(session_id, "released").await?;
    Ok(Json(json!({
        "success": result.released,
        "promoted": result.promoted,
    })))
}

/// `POST /access/heartbeat/{session_id}`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    state.registry.touch(session_id);
    let updated = state.coordinator.heartbeat(session_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// `GET /access/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.coordinator.status().await?;
    Ok(Json(json!({
        "active_count": snapshot.active_count,
        "queue_length": snapshot.queue_length,
        "max_concurrent": snapshot.max_concurrent,
        "domain_allocations": snapshot.domain_allocations,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_session_id() {
        assert!(parse_session_id("not-a-valid-id").is_err());
    }
}
