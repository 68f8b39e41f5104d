use crate::services::{CoordinatorHandle, NotificationHub, SessionRegistry, StoreHandle};

/// Shared application state handed to every handler via axum's `State`
/// extractor, the same role the teacher's `ClaudeProviders`/`CookieActorHandle`
/// play in `router.rs`.
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub registry: SessionRegistry,
    pub hub: NotificationHub,
    pub coordinator: CoordinatorHandle,
}

impl AppState {
    pub async fn new(data_dir: std::path::PathBuf) -> Result<Self, ractor::SpawnErr> {
        let store = StoreHandle::start(data_dir).await?;
        let registry = SessionRegistry::new();
        let hub = NotificationHub::new();
        let coordinator = CoordinatorHandle::start(store.clone(), hub.clone()).await?;
        Ok(Self {
            store,
            registry,
            hub,
            coordinator,
        })
    }
}
