use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::BrokerError,
    types::{Session, SessionId},
};

/// Read-mostly session table. Grounded on the teacher's "state behind a
/// lock, handed out as a cheap `Clone` handle" shape (`CookieActorHandle`),
/// but backed by a plain `RwLock` rather than an actor: session lookups
/// happen on almost every request and never need to serialize against each
/// other the way store/coordinator mutations do.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create(&self, remote_addr: String) -> SessionId {
        let session = Session::new(remote_addr);
        let id = session.id;
        self.inner.write().insert(id, session);
        id
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.inner.read().get(&id).cloned()
    }

    pub fn touch(&self, id: SessionId) {
        if let Some(session) = self.inner.write().get_mut(&id) {
            session.last_seen = Utc::now();
        }
    }

    pub fn attach_channel(&self, id: SessionId) -> Result<(), BrokerError> {
        let mut guard = self.inner.write();
        let session = guard.get_mut(&id).ok_or(BrokerError::UnknownSession)?;
        if session.has_channel {
            return Err(BrokerError::ChannelInUse);
        }
        session.has_channel = true;
        Ok(())
    }

    pub fn detach_channel(&self, id: SessionId) {
        if let Some(session) = self.inner.write().get_mut(&id) {
            session.has_channel = false;
        }
    }

    pub fn destroy(&self, id: SessionId) {
        self.inner.write().remove(&id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the caller's address the way the spec requires: `X-Forwarded-For`
/// first token, then `X-Real-IP`, then the transport-level peer address.
pub fn resolve_remote_addr(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer_addr: std::net::SocketAddr,
) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = real_ip {
        if !ip.trim().is_empty() {
            return ip.trim().to_string();
        }
    }
    peer_addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_lookup_round_trips() {
        let registry = SessionRegistry::new();
        let id = registry.create("127.0.0.1".into());
        assert!(registry.get(id).is_some());
    }

    #[test]
    fn attach_channel_twice_conflicts() {
        let registry = SessionRegistry::new();
        let id = registry.create("127.0.0.1".into());
        registry.attach_channel(id).unwrap();
        assert!(matches!(
            registry.attach_channel(id),
            Err(BrokerError::ChannelInUse)
        ));
    }

    #[test]
    fn remote_addr_prefers_forwarded_for() {
        let peer: std::net::SocketAddr = "10.0.0.1:1234".parse().unwrap();
        assert_eq!(
            resolve_remote_addr(Some("1.2.3.4, 5.6.7.8"), Some("9.9.9.9"), peer),
            "1.2.3.4"
        );
        assert_eq!(resolve_remote_addr(None, Some("9.9.9.9"), peer), "9.9.9.9");
        assert_eq!(resolve_remote_addr(None, None, peer), "10.0.0.1");
    }
}
