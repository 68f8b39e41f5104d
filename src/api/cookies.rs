use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{api::error::ApiError, state::AppState, types::SessionId};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /domains`
pub async fn domains(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let domains = state.store.list_domains().await?;
    let status = state.coordinator.status().await?;
    let out: Vec<Value> = domains
        .into_iter()
        .map(|d| {
            let owner = status.domain_allocations.get(&d.domain).cloned();
            json!({
                "domain": d.domain,
                "cookie_count": d.cookie_count,
                "available": owner.is_none(),
                "allocated_to": owner.map(|s| vec![s]).unwrap_or_default(),
            })
        })
        .collect();
    Ok(Json(Value::Array(out)))
}

/// `GET /cookies` — full snapshot, no per-layer auth (operators deploy this
/// behind their own trust boundary, per the spec).
pub async fn get_all_cookies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.store.get_all().await?;
    Ok(Json(json!({
        "cookies": snapshot.cookies,
        "logged_in": snapshot.logged_in,
        "last_updated": snapshot.last_updated,
        "count": snapshot.count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CookiesForDomainsBody {
    pub session_id: String,
    pub domains: Vec<String>,
}

/// `POST /cookies/domains` — cookies scoped to the caller's current
/// allocation; 403 if any requested domain is not allocated to it.
pub async fn cookies_for_domains(
    State(state): State<AppState>,
    Json(body): Json<CookiesForDomainsBody>,
) -> Result<Json<Value>, ApiError> {
    let session_id: SessionId = body
        .session_id
        .parse()
        .map_err(|_| ApiError::malformed_input("invalid session_id"))?;

    let snapshot = state.coordinator.status().await?;
    for d in &body.domains {
        match snapshot.domain_allocations.get(d) {
            Some(owner) if *owner == session_id.to_string() => {}
            _ => {
                return Err(ApiError::forbidden(format!(
                    "session is not allocated domain {d}"
                )));
            }
        }
    }

    let cookies = state.store.get_for_domains(body.domains).await?;
    Ok(Json(json!({ "cookies": cookies })))
}
