use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use crate::config::BROKER_CONFIG;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Gate on the `X-Admin-Key` header, the same `from_extractor`-composable
/// shape as the teacher's `RequireAdminAuth`/`RequireXApiKeyAuth`.
pub struct RequireAdminAuth;

impl<S> FromRequestParts<S> for RequireAdminAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if BROKER_CONFIG.load().admin_auth(key) {
            Ok(RequireAdminAuth)
        } else {
            Err((StatusCode::UNAUTHORIZED, "missing or invalid X-Admin-Key"))
        }
    }
}
