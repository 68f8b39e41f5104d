use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use snafu::{GenerateImplicitData, Location};
use tracing::{info, warn};

use crate::{
    config::BROKER_CONFIG,
    error::BrokerError,
    services::{notification_hub::NotificationHub, store_actor::StoreHandle},
    types::{AccessRecord, Decision, Notification, Promoted, QueueEntry, QueueReason, ReleaseResult, SessionId},
};

const TIMEOUT_SWEEP_SECS: u64 = 60;

#[derive(Debug)]
enum CoordinatorMessage {
    RequestAccess {
        session_id: SessionId,
        priority: i64,
        requested_domains: Option<HashSet<String>>,
        reply: RpcReplyPort<Decision>,
    },
    ReleaseAccess {
        session_id: SessionId,
        reason: String,
        reply: RpcReplyPort<ReleaseResult>,
    },
    Heartbeat {
        session_id: SessionId,
        reply: RpcReplyPort<bool>,
    },
    Kick {
        session_id: SessionId,
        reason: String,
        reply: RpcReplyPort<ReleaseResult>,
    },
    SetMaxConcurrent {
        max: usize,
        reply: RpcReplyPort<Vec<Promoted>>,
    },
    Status(RpcReplyPort<StatusSnapshot>),
    Detailed(RpcReplyPort<Vec<ClientDetail>>),
    CheckTimeouts,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub active_count: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
    pub domain_allocations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientDetail {
    pub session_id: String,
    pub state: &'static str,
    pub priority: i64,
    pub allocated_domains: Vec<String>,
    pub position: Option<usize>,
    pub granted_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

struct CoordinatorState {
    active: HashMap<SessionId, AccessRecord>,
    queue: Vec<QueueEntry>,
    domain_allocations: HashMap<String, SessionId>,
    store: StoreHandle,
    hub: NotificationHub,
}

struct CoordinatorActor;

impl CoordinatorActor {
    fn max_concurrent() -> usize {
        BROKER_CONFIG.load().server.max_concurrent_clients
    }

    fn max_inactive() -> ChronoDuration {
        ChronoDuration::minutes(BROKER_CONFIG.load().server.max_inactive_minutes as i64)
    }

    fn sort_queue(queue: &mut [QueueEntry]) {
        queue.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
    }

    fn position_of(queue: &[QueueEntry], session_id: SessionId) -> Option<usize> {
        queue.iter().position(|e| e.session_id == session_id)
    }

    async fn domain_is_known(store: &StoreHandle, domain: &str) -> bool {
        store
            .list_domains()
            .await
            .map(|domains| domains.iter().any(|d| d.domain == domain))
            .unwrap_or(false)
    }

    async fn domains_admissible(
        state: &CoordinatorState,
        session_id: SessionId,
        domains: &HashSet<String>,
    ) -> Result<(), QueueReason> {
        for d in domains {
            if !Self::domain_is_known(&state.store, d).await {
                return Err(QueueReason::DomainNotExists);
            }
            if let Some(owner) = state.domain_allocations.get(d) {
                if *owner != session_id {
                    return Err(QueueReason::DomainHeld);
                }
            }
        }
        Ok(())
    }

    /// Walk the queue, promoting every admissible entry. Per-domain failures
    /// (held or unknown) skip past an entry without stopping the walk;
    /// slots-exhausted stops it. Returns what was promoted so the caller can
    /// notify outside any lock-equivalent section.
    async fn promote(state: &mut CoordinatorState) -> Vec<Promoted> {
        Self::sort_queue(&mut state.queue);
        let mut promoted = Vec::new();
        let mut i = 0;
        while i < state.queue.len() {
            if state.active.len() >= Self::max_concurrent() {
                break;
            }
            let entry = state.queue[i].clone();
            match Self::domains_admissible(state, entry.session_id, &entry.requested_domains).await
            {
                Ok(()) => {
                    state.queue.remove(i);
                    let now = Utc::now();
                    for d in &entry.requested_domains {
                        state.domain_allocations.insert(d.clone(), entry.session_id);
                    }
                    state.active.insert(
                        entry.session_id,
                        AccessRecord {
                            session_id: entry.session_id,
                            granted_at: now,
                            last_activity: now,
                            allocated_domains: entry.requested_domains.clone(),
                            priority: entry.priority,
                        },
                    );
                    promoted.push(Promoted {
                        session_id: entry.session_id.to_string(),
                        allocated_domains: entry.requested_domains.iter().cloned().collect(),
                    });
                }
                Err(QueueReason::SlotsExhausted) => break,
                Err(_) => {
                    i += 1;
                }
            }
        }
        promoted
    }

    fn release_locked(state: &mut CoordinatorState, session_id: SessionId) -> bool {
        let Some(record) = state.active.remove(&session_id) else {
            state.queue.retain(|e| e.session_id != session_id);
            return false;
        };
        state
            .domain_allocations
            .retain(|_, owner| *owner != session_id);
        drop(record);
        true
    }

    fn dispatch_promotions(hub: &NotificationHub, promoted: &[Promoted]) {
        for p in promoted {
            if let Ok(id) = p.session_id.parse::<SessionId>() {
                hub.send(
                    id,
                    Notification::AccessGranted {
                        allocated_domains: p.allocated_domains.clone(),
                    },
                );
            }
        }
    }
}

impl Actor for CoordinatorActor {
    type Msg = CoordinatorMessage;
    type State = CoordinatorState;
    type Arguments = (StoreHandle, NotificationHub);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (store, hub): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(TIMEOUT_SWEEP_SECS));
            loop {
                interval.tick().await;
                if ractor::cast!(myself_clone, CoordinatorMessage::CheckTimeouts).is_err() {
                    break;
                }
            }
        });
        Ok(CoordinatorState {
            active: HashMap::new(),
            queue: Vec::new(),
            domain_allocations: HashMap::new(),
            store,
            hub,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMessage::RequestAccess {
                session_id,
                priority,
                requested_domains,
                reply,
            } => {
                let decision = Self::handle_request(state, session_id, priority, requested_domains).await;
                reply.send(decision)?;
            }
            CoordinatorMessage::ReleaseAccess {
                session_id,
                reason,
                reply,
            } => {
                let released = Self::release_locked(state, session_id);
                let promoted = if released { Self::promote(state).await } else { Vec::new() };
                info!(%session_id, %reason, released, promoted = promoted.len(), "access released");
                Self::dispatch_promotions(&state.hub, &promoted);
                reply.send(ReleaseResult { released, promoted })?;
            }
            CoordinatorMessage::Heartbeat { session_id, reply } => {
                let active = if let Some(record) = state.active.get_mut(&session_id) {
                    record.last_activity = Utc::now();
                    true
                } else {
                    false
                };
                reply.send(active)?;
            }
            CoordinatorMessage::Kick {
                session_id,
                reason,
                reply,
            } => {
                let released = Self::release_locked(state, session_id);
                let promoted = if released { Self::promote(state).await } else { Vec::new() };
                warn!(%session_id, %reason, "client kicked");
                state.hub.send(
                    session_id,
                    Notification::AccessRevoked { reason: reason.clone() },
                );
                Self::dispatch_promotions(&state.hub, &promoted);
                reply.send(ReleaseResult { released, promoted })?;
            }
            CoordinatorMessage::SetMaxConcurrent { max, reply } => {
                crate::config::set_max_concurrent(max);
                let promoted = Self::promote(state).await;
                Self::dispatch_promotions(&state.hub, &promoted);
                reply.send(promoted)?;
            }
            CoordinatorMessage::Status(reply) => {
                reply.send(StatusSnapshot {
                    active_count: state.active.len(),
                    queue_length: state.queue.len(),
                    max_concurrent: Self::max_concurrent(),
                    domain_allocations: state
                        .domain_allocations
                        .iter()
                        .map(|(d, s)| (d.clone(), s.to_string()))
                        .collect(),
                })?;
            }
            CoordinatorMessage::Detailed(reply) => {
                let mut details: Vec<ClientDetail> = state
                    .active
                    .values()
                    .map(|r| ClientDetail {
                        session_id: r.session_id.to_string(),
                        state: "active",
                        priority: r.priority,
                        allocated_domains: r.allocated_domains.iter().cloned().collect(),
                        position: None,
                        granted_at: Some(r.granted_at),
                        last_activity: Some(r.last_activity),
                    })
                    .collect();
                for (i, entry) in state.queue.iter().enumerate() {
                    details.push(ClientDetail {
                        session_id: entry.session_id.to_string(),
                        state: "queued",
                        priority: entry.priority,
                        allocated_domains: entry.requested_domains.iter().cloned().collect(),
                        position: Some(i + 1),
                        granted_at: None,
                        last_activity: None,
                    });
                }
                reply.send(details)?;
            }
            CoordinatorMessage::CheckTimeouts => {
                let cutoff = Utc::now() - Self::max_inactive();
                let stale: Vec<SessionId> = state
                    .active
                    .iter()
                    .filter(|(_, r)| r.last_activity < cutoff)
                    .map(|(id, _)| *id)
                    .collect();
                for id in stale {
                    Self::release_locked(state, id);
                    state
                        .hub
                        .send(id, Notification::AccessRevoked { reason: "timeout".into() });
                    warn!(session_id = %id, "released for inactivity timeout");
                }
                let promoted = Self::promote(state).await;
                Self::dispatch_promotions(&state.hub, &promoted);
            }
        }
        Ok(())
    }
}

impl CoordinatorActor {
    async fn handle_request(
        state: &mut CoordinatorState,
        session_id: SessionId,
        priority: i64,
        requested_domains: Option<HashSet<String>>,
    ) -> Decision {
        if let Some(record) = state.active.get(&session_id) {
            match &requested_domains {
                Some(domains) if *domains != record.allocated_domains => {
                    return Self::reallocate(state, session_id, domains.clone()).await;
                }
                _ => {
                    if let Some(record) = state.active.get_mut(&session_id) {
                        record.last_activity = Utc::now();
                    }
                    return Decision::AlreadyActive;
                }
            }
        }

        if let Some(pos) = CoordinatorActor::position_of(&state.queue, session_id) {
            let mut domains_for_reason = state.queue[pos].requested_domains.clone();
            if let Some(entry) = state.queue.get_mut(pos) {
                entry.priority = priority;
                if let Some(domains) = requested_domains.clone() {
                    entry.requested_domains = domains.clone();
                    domains_for_reason = domains;
                }
            }
            CoordinatorActor::sort_queue(&mut state.queue);
            let position = CoordinatorActor::position_of(&state.queue, session_id).unwrap_or(0);
            let reason = if domains_for_reason.is_empty() {
                QueueReason::SlotsExhausted
            } else {
                match CoordinatorActor::domains_admissible(state, session_id, &domains_for_reason).await {
                    Err(r) => r,
                    Ok(()) => QueueReason::SlotsExhausted,
                }
            };
            return Decision::Queued {
                position: position + 1,
                reason,
            };
        }

        let domains = requested_domains.unwrap_or_default();
        if state.active.len() < CoordinatorActor::max_concurrent() {
            let admissible = if domains.is_empty() {
                Ok(())
            } else {
                CoordinatorActor::domains_admissible(state, session_id, &domains).await
            };
            if admissible.is_ok() {
                let now = Utc::now();
                for d in &domains {
                    state.domain_allocations.insert(d.clone(), session_id);
                }
                state.active.insert(
                    session_id,
                    AccessRecord {
                        session_id,
                        granted_at: now,
                        last_activity: now,
                        allocated_domains: domains.clone(),
                        priority,
                    },
                );
                return Decision::Granted {
                    allocated_domains: domains.into_iter().collect(),
                };
            }
        }

        let reason = if domains.is_empty() {
            QueueReason::SlotsExhausted
        } else {
            match CoordinatorActor::domains_admissible(state, session_id, &domains).await {
                Err(r) => r,
                Ok(()) => QueueReason::SlotsExhausted,
            }
        };
        state.queue.push(QueueEntry {
            session_id,
            enqueued_at: Utc::now(),
            priority,
            requested_domains: domains,
        });
        CoordinatorActor::sort_queue(&mut state.queue);
        let position = CoordinatorActor::position_of(&state.queue, session_id).unwrap_or(0);
        Decision::Queued { position: position + 1, reason }
    }

    async fn reallocate(
        state: &mut CoordinatorState,
        session_id: SessionId,
        requested: HashSet<String>,
    ) -> Decision {
        let current = state
            .active
            .get(&session_id)
            .map(|r| r.allocated_domains.clone())
            .unwrap_or_default();
        let to_acquire: HashSet<String> = requested.difference(&current).cloned().collect();

        let mut held_by_others = Vec::new();
        for d in &to_acquire {
            if let Some(owner) = state.domain_allocations.get(d) {
                if *owner != session_id {
                    held_by_others.push(d.clone());
                }
            } else if !CoordinatorActor::domain_is_known(&state.store, d).await {
                held_by_others.push(d.clone());
            }
        }
        if !held_by_others.is_empty() {
            return Decision::Conflict { held_by_others };
        }

        let to_release: HashSet<String> = current.difference(&requested).cloned().collect();
        for d in &to_release {
            state.domain_allocations.remove(d);
        }
        for d in &to_acquire {
            state.domain_allocations.insert(d.clone(), session_id);
        }
        if let Some(record) = state.active.get_mut(&session_id) {
            record.allocated_domains = requested.clone();
            record.last_activity = Utc::now();
        }
        Decision::Granted {
            allocated_domains: requested.into_iter().collect(),
        }
    }
}

/// Handle for interacting with the access coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    actor_ref: ActorRef<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub async fn start(store: StoreHandle, hub: NotificationHub) -> Result<Self, ractor::SpawnErr> {
        let (actor_ref, _join_handle) = Actor::spawn(None, CoordinatorActor, (store, hub)).await?;
        Ok(Self { actor_ref })
    }

    fn wrap(op: &'static str, e: impl std::fmt::Display) -> BrokerError {
        BrokerError::RactorError {
            loc: Location::generate(),
            msg: format!("failed to communicate with CoordinatorActor for {op}: {e}"),
        }
    }

    pub async fn request_access(
        &self,
        session_id: SessionId,
        priority: i64,
        requested_domains: Option<HashSet<String>>,
    ) -> Result<Decision, BrokerError> {
        ractor::call!(
            self.actor_ref,
            CoordinatorMessage::RequestAccess,
            session_id,
            priority,
            requested_domains
        )
        .map_err(|e| Self::wrap("request_access", e))
    }

    pub async fn release_access(
        &self,
        session_id: SessionId,
        reason: impl Into<String>,
    ) -> Result<ReleaseResult, BrokerError> {
        let reason = reason.into();
        ractor::call!(
            self.actor_ref,
            CoordinatorMessage::ReleaseAccess,
            session_id,
            reason
        )
        .map_err(|e| Self::wrap("release_access", e))
    }

    pub async fn heartbeat(&self, session_id: SessionId) -> Result<bool, BrokerError> {
        ractor::call!(self.actor_ref, CoordinatorMessage::Heartbeat, session_id)
            .map_err(|e| Self::wrap("heartbeat", e))
    }

    pub async fn kick(
        &self,
        session_id: SessionId,
        reason: impl Into<String>,
    ) -> Result<ReleaseResult, BrokerError> {
        let reason = reason.into();
        ractor::call!(self.actor_ref, CoordinatorMessage::Kick, session_id, reason)
            .map_err(|e| Self::wrap("kick", e))
    }

    pub async fn set_max_concurrent(&self, max: usize) -> Result<Vec<Promoted>, BrokerError> {
        ractor::call!(self.actor_ref, CoordinatorMessage::SetMaxConcurrent, max)
            .map_err(|e| Self::wrap("set_max_concurrent", e))
    }

    pub async fn status(&self) -> Result<StatusSnapshot, BrokerError> {
        ractor::call!(self.actor_ref, CoordinatorMessage::Status)
            .map_err(|e| Self::wrap("status", e))
    }

    pub async fn detailed(&self) -> Result<Vec<ClientDetail>, BrokerError> {
        ractor::call!(self.actor_ref, CoordinatorMessage::Detailed)
            .map_err(|e| Self::wrap("detailed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store_actor::StoreHandle;

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("credbroker-coordinator-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    /// Default `max_concurrent_clients` is 2 (see `config.rs`), so the third
    /// and fourth no-domain requests must queue, 1-indexed.
    #[tokio::test]
    async fn queued_positions_are_one_indexed() {
        let store = StoreHandle::start(tempdir()).await.unwrap();
        let hub = NotificationHub::new();
        let coordinator = CoordinatorHandle::start(store, hub).await.unwrap();

        let s1 = SessionId::new();
        let s2 = SessionId::new();
        let s3 = SessionId::new();
        let s4 = SessionId::new();

        assert!(matches!(
            coordinator.request_access(s1, 0, None).await.unwrap(),
            Decision::Granted { .. }
        ));
        assert!(matches!(
            coordinator.request_access(s2, 0, None).await.unwrap(),
            Decision::Granted { .. }
        ));

        match coordinator.request_access(s3, 0, None).await.unwrap() {
            Decision::Queued { position, .. } => assert_eq!(position, 1),
            other => panic!("expected s3 to queue, got {other:?}"),
        }
        match coordinator.request_access(s4, 0, None).await.unwrap() {
            Decision::Queued { position, .. } => assert_eq!(position, 2),
            other => panic!("expected s4 to queue, got {other:?}"),
        }

        let details = coordinator.detailed().await.unwrap();
        let queued_positions: std::collections::HashSet<usize> = details
            .iter()
            .filter(|d| d.state == "queued")
            .filter_map(|d| d.position)
            .collect();
        assert_eq!(queued_positions, std::collections::HashSet::from([1, 2]));
    }
}
