use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use super::session::SessionId;

/// One currently-granted access holder.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub session_id: SessionId,
    pub granted_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub allocated_domains: HashSet<String>,
    pub priority: i64,
}

/// One waiting queue member, ordered by `(priority desc, enqueued_at asc)`.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub session_id: SessionId,
    pub enqueued_at: DateTime<Utc>,
    pub priority: i64,
    pub requested_domains: HashSet<String>,
}

/// Why a queue entry is still waiting, surfaced for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueReason {
    SlotsExhausted,
    DomainHeld,
    DomainNotExists,
}

/// Outcome of `requestAccess`.
#[derive(Debug, Clone)]
pub enum Decision {
    AlreadyActive,
    Granted {
        allocated_domains: Vec<String>,
    },
    Queued {
        position: usize,
        reason: QueueReason,
    },
    Conflict {
        held_by_others: Vec<String>,
    },
}

/// One promotion that fired as a side effect of a release/kick/cap-raise.
#[derive(Debug, Clone, Serialize)]
pub struct Promoted {
    pub session_id: String,
    pub allocated_domains: Vec<String>,
}

/// Outcome of `releaseAccess`, including cascading promotions (Open Question
/// #1: callers get this inline instead of polling `/access/status` again).
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResult {
    pub released: bool,
    pub promoted: Vec<Promoted>,
}
