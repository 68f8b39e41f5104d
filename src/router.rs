use axum::{
    Router,
    http::Method,
    middleware::from_extractor,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};

use crate::{api::*, middleware::RequireAdminAuth, state::AppState};

/// Builder for the broker's HTTP/WS surface. Generalizes the teacher's
/// `RouterBuilder`: an async constructor that starts the core actors, a
/// `with_default_setup` that chains `route_*` registration methods, and a
/// `build` that returns the assembled `Router`.
pub struct RouterBuilder {
    state: AppState,
    inner: Router,
}

impl RouterBuilder {
    pub async fn new(data_dir: std::path::PathBuf) -> Self {
        let state = AppState::new(data_dir)
            .await
            .expect("failed to start core actors");
        RouterBuilder {
            state,
            inner: Router::new(),
        }
    }

    pub fn with_default_setup(self) -> Self {
        self.route_session_endpoints()
            .route_access_endpoints()
            .route_cookie_endpoints()
            .route_admin_endpoints()
            .route_ws_endpoint()
            .with_tower_trace()
            .with_cors()
    }

    fn route_session_endpoints(mut self) -> Self {
        let router = Router::new()
            .route("/create_session", post(create_session))
            .route("/health", get(health))
            .with_state(self.state.clone());
        self.inner = self.inner.merge(router);
        self
    }

    fn route_access_endpoints(mut self) -> Self {
        let router = Router::new()
            .route("/access/request", post(request_access))
            .route("/access/release/{session_id}", post(release_access))
            .route("/access/heartbeat/{session_id}", post(heartbeat))
            .route("/access/status", get(status))
            .layer(ServiceBuilder::new().layer(CompressionLayer::new()))
            .with_state(self.state.clone());
        self.inner = self.inner.merge(router);
        self
    }

    fn route_cookie_endpoints(mut self) -> Self {
        let router = Router::new()
            .route("/domains", get(domains))
            .route("/cookies", get(get_all_cookies))
            .route("/cookies/domains", post(cookies_for_domains))
            .with_state(self.state.clone());
        self.inner = self.inner.merge(router);
        self
    }

    fn route_admin_endpoints(mut self) -> Self {
        let router = Router::new()
            .route("/admin/cookies", post(import_cookies).delete(clear_cookies))
            .route("/admin/cookies/delete", post(delete_cookies))
            .route("/admin/cookies/import", post(import_cookies))
            .route("/admin/cookies/smart-import", post(smart_import_cookies))
            .route("/admin/server/info", get(server_info))
            .route("/admin/server/config/max-clients", post(set_max_clients))
            .route("/admin/clients/{id}/kick", post(kick_client))
            .route("/admin/clients/{id}/priority", post(set_client_priority))
            .route("/admin/clients/detailed", get(detailed_clients))
            .layer(from_extractor::<RequireAdminAuth>())
            .with_state(self.state.clone());
        self.inner = self.inner.merge(router);

        // Bootstrap aid: intentionally outside the `RequireAdminAuth` layer above —
        // its entire purpose is letting an operator discover the key before they have it.
        let key_router = Router::new()
            .route("/admin/key", get(admin_key))
            .with_state(self.state.clone());
        self.inner = self.inner.merge(key_router);
        self
    }

    fn route_ws_endpoint(mut self) -> Self {
        let router = Router::new()
            .route("/ws/{session_id}", get(ws_handler))
            .with_state(self.state.clone());
        self.inner = self.inner.merge(router);
        self
    }

    fn with_cors(mut self) -> Self {
        use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
        use http::header::HeaderName;

        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                AUTHORIZATION,
                CONTENT_TYPE,
                HeaderName::from_static("x-admin-key"),
            ]);

        self.inner = self.inner.layer(cors);
        self
    }

    fn with_tower_trace(mut self) -> Self {
        use tower_http::trace::TraceLayer;

        self.inner = self.inner.layer(TraceLayer::new_for_http());
        self
    }

    pub fn build(self) -> Router {
        self.inner
    }
}
