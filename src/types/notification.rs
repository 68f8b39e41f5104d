use chrono::{DateTime, Utc};
use serde::Serialize;

/// Messages pushed to a worker over its channel. Tagged the way the teacher
/// tags its wire enums (`#[serde(tag = "type")]`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    AccessGranted {
        allocated_domains: Vec<String>,
    },
    AccessRevoked {
        reason: String,
    },
    TimeoutWarning {
        seconds_remaining: u64,
    },
    CookiesUpdated {
        count: usize,
        logged_in: bool,
        at: DateTime<Utc>,
    },
    CookiesCleared {
        at: DateTime<Utc>,
    },
    QueuePosition {
        position: usize,
    },
}
