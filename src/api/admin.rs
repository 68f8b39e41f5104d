use axum::{Json, extract::{Path, State}};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    api::error::ApiError,
    config::BROKER_CONFIG,
    state::AppState,
    types::{Cookie, SessionId},
};

/// `GET /admin/server/info`
pub async fn server_info(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let status = state.coordinator.status().await?;
    let cookies = state.store.get_all().await?;
    Ok(Json(json!({
        "max_concurrent_clients": status.max_concurrent,
        "active_count": status.active_count,
        "queue_length": status.queue_length,
        "cookie_count": cookies.count,
        "logged_in": cookies.logged_in,
        "last_updated": cookies.last_updated,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MaxClientsBody {
    pub max_concurrent_clients: usize,
}

/// `POST /admin/server/config/max-clients`
pub async fn set_max_clients(
    State(state): State<AppState>,
    Json(body): Json<MaxClientsBody>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=10).contains(&body.max_concurrent_clients) {
        return Err(ApiError::malformed_input(
            "max_concurrent_clients must be between 1 and 10",
        ));
    }
    let promoted = state
        .coordinator
        .set_max_concurrent(body.max_concurrent_clients)
        .await?;
    info!(max = body.max_concurrent_clients, "max_concurrent_clients updated");
    Ok(Json(json!({ "max_concurrent_clients": body.max_concurrent_clients, "promoted": promoted })))
}

#[derive(Debug, Deserialize)]
pub struct KickBody {
    #[serde(default = "default_kick_reason")]
    pub reason: String,
}

fn default_kick_reason() -> String {
    "kicked_by_admin".to_string()
}

/// `POST /admin/clients/{id}/kick`
pub async fn kick_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<KickBody>,
) -> Result<Json<Value>, ApiError> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| ApiError::malformed_input("invalid session id"))?;
    let result = state.coordinator.kick(session_id, body.reason).await?;
    Ok(Json(json!({ "success": result.released, "promoted": result.promoted })))
}

#[derive(Debug, Deserialize)]
pub struct PriorityBody {
    pub priority: i64,
}

/// `POST /admin/clients/{id}/priority`
///
/// Re-requests access on the client's behalf at the new priority; the
/// client's allocation/queue position is otherwise unaffected.
pub async fn set_client_priority(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PriorityBody>,
) -> Result<Json<Value>, ApiError> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| ApiError::malformed_input("invalid session id"))?;
    let decision = state
        .coordinator
        .request_access(session_id, body.priority, None)
        .await?;
    Ok(Json(json!({ "session_id": id, "priority": body.priority, "decision": format!("{decision:?}") })))
}

/// `GET /admin/clients/detailed`
pub async fn detailed_clients(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let details = state.coordinator.detailed().await?;
    Ok(Json(json!({ "clients": details })))
}

/// `DELETE /admin/cookies`
pub async fn clear_cookies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.store.admin_clear().await?;
    state.hub.broadcast(crate::types::Notification::CookiesCleared { at: chrono::Utc::now() });
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ImportCookiesBody {
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub force_replace: bool,
    #[serde(default)]
    pub logged_in: Option<bool>,
}

/// `POST /admin/cookies/import`
pub async fn import_cookies(
    State(state): State<AppState>,
    Json(body): Json<ImportCookiesBody>,
) -> Result<Json<Value>, ApiError> {
    if body.force_replace {
        state.store.admin_replace(body.cookies, body.logged_in).await?;
    } else {
        state.store.admin_merge(body.cookies).await?;
    }
    let snapshot = state.store.get_all().await?;
    state.hub.broadcast(crate::types::Notification::CookiesUpdated {
        count: snapshot.count,
        logged_in: snapshot.logged_in,
        at: snapshot.last_updated,
    });
    Ok(Json(json!({ "success": true, "count": snapshot.count })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteCookiesBody {
    /// `(name, domain, path)` triples.
    pub keys: Vec<(String, String, String)>,
}

/// `POST /admin/cookies/delete`
pub async fn delete_cookies(
    State(state): State<AppState>,
    Json(body): Json<DeleteCookiesBody>,
) -> Result<Json<Value>, ApiError> {
    state.store.admin_delete(body.keys).await?;
    let snapshot = state.store.get_all().await?;
    state.hub.broadcast(crate::types::Notification::CookiesUpdated {
        count: snapshot.count,
        logged_in: snapshot.logged_in,
        at: snapshot.last_updated,
    });
    Ok(Json(json!({ "success": true, "count": snapshot.count })))
}

#[derive(Debug, Deserialize)]
pub struct SmartImportBody {
    pub cookies_by_domain: std::collections::HashMap<String, Vec<Cookie>>,
    #[serde(default)]
    pub strategy: SmartImportStrategy,
}

#[derive(Debug, Default, Deserialize)]
pub struct SmartImportStrategy {
    #[serde(default)]
    pub sharing: Option<String>,
}

fn notification_type_for(strategy: &SmartImportStrategy) -> &'static str {
    match strategy.sharing.as_deref() {
        Some("private") => "cookies_private_update",
        Some("secure") => "cookies_secure_update",
        Some("shared") | Some("high") => "cookies_shared_update",
        _ => "cookies_updated",
    }
}

/// `POST /admin/cookies/smart-import`
///
/// `strategy` is advisory metadata: it may (if
/// `admin.smart_import_adjusts_concurrency` is enabled) nudge
/// `max_concurrent_clients`, but it never changes cookie merge semantics.
pub async fn smart_import_cookies(
    State(state): State<AppState>,
    Json(body): Json<SmartImportBody>,
) -> Result<Json<Value>, ApiError> {
    let all: Vec<Cookie> = body.cookies_by_domain.into_values().flatten().collect();
    state.store.admin_merge(all).await?;

    if BROKER_CONFIG.load().admin.smart_import_adjusts_concurrency {
        let current = BROKER_CONFIG.load().server.max_concurrent_clients;
        let new_max = match body.strategy.sharing.as_deref() {
            Some("high") => (current + 1).min(5),
            Some("none") => 1,
            _ => current,
        };
        if new_max != current {
            let promoted = state.coordinator.set_max_concurrent(new_max).await?;
            info!(new_max, promoted = promoted.len(), "smart-import adjusted concurrency");
        }
    }

    let snapshot = state.store.get_all().await?;
    let notification_type = notification_type_for(&body.strategy);
    state.hub.broadcast(crate::types::Notification::CookiesUpdated {
        count: snapshot.count,
        logged_in: snapshot.logged_in,
        at: snapshot.last_updated,
    });
    Ok(Json(json!({
        "success": true,
        "count": snapshot.count,
        "notification_type": notification_type,
    })))
}

/// `GET /admin/key` — opt-in bootstrap aid (Open Question #3).
pub async fn admin_key() -> Result<Json<Value>, ApiError> {
    if !BROKER_CONFIG.load().admin.expose_key_endpoint {
        return Err(ApiError::not_found("endpoint disabled"));
    }
    Ok(Json(json!({ "admin_key": BROKER_CONFIG.load().admin_key.clone() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smart_import_notification_type_follows_sharing_level() {
        let high = SmartImportStrategy { sharing: Some("high".into()) };
        assert_eq!(notification_type_for(&high), "cookies_shared_update");
        let none = SmartImportStrategy { sharing: Some("none".into()) };
        assert_ne!(notification_type_for(&none), "cookies_shared_update");
    }
}
