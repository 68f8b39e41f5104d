use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::warn;

use crate::types::{Notification, SessionId};

const CHANNEL_CAPACITY: usize = 32;

struct ChannelInner {
    queue: Mutex<VecDeque<Notification>>,
    notify: Notify,
    closed: AtomicBool,
}

/// One session's outbound push channel, a bounded ring buffer rather than a
/// plain `mpsc`: a full channel must drop its *oldest* queued frame before
/// appending the new one (spec §4.C), which a `Sender` alone can't express.
/// `access_granted`/`access_revoked` are the exception — overflowing either
/// closes the channel instead, forcing the worker to reconnect and re-sync.
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// Receiving half handed to the websocket transport layer.
pub struct PushReceiver {
    inner: Arc<ChannelInner>,
}

impl PushReceiver {
    /// Waits for the next queued notification, or `None` once the channel
    /// has been closed (unregistered, or overflowed on a lossless frame).
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            if let Some(n) = self.inner.queue.lock().pop_front() {
                return Some(n);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }
}

/// Owns one push channel per live session. Grounded on the original
/// `ConnectionManager`'s per-session websocket map and broadcast loop,
/// re-expressed with a `parking_lot`-guarded queue per session rather than
/// Python's asyncio-managed socket objects.
#[derive(Clone)]
pub struct NotificationHub {
    channels: Arc<RwLock<HashMap<SessionId, Channel>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a fresh channel for `id`, returning the receiving half for
    /// the transport layer to forward over the websocket.
    pub fn register(&self, id: SessionId) -> PushReceiver {
        let inner = Arc::new(ChannelInner {
            queue: Mutex::new(VecDeque::with_capacity(CHANNEL_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.channels.write().insert(
            id,
            Channel {
                inner: inner.clone(),
            },
        );
        PushReceiver { inner }
    }

    pub fn unregister(&self, id: SessionId) {
        if let Some(channel) = self.channels.write().remove(&id) {
            channel.inner.closed.store(true, Ordering::Release);
            channel.inner.notify.notify_waiters();
        }
    }

    /// Best-effort, at-most-once, in-order per session. `access_granted` and
    /// `access_revoked` are never silently dropped: on a full channel the
    /// session's transport is torn down instead. Any other notification
    /// drops the oldest queued frame to make room for the newest.
    pub fn send(&self, id: SessionId, notification: Notification) {
        let inner = { self.channels.read().get(&id).map(|c| c.inner.clone()) };
        let Some(inner) = inner else {
            return;
        };
        let lossless = matches!(
            notification,
            Notification::AccessGranted { .. } | Notification::AccessRevoked { .. }
        );

        let mut queue = inner.queue.lock();
        if queue.len() >= CHANNEL_CAPACITY {
            if lossless {
                drop(queue);
                warn!(session = %id, "push channel saturated on a lossless notification, closing");
                self.channels.write().remove(&id);
                inner.closed.store(true, Ordering::Release);
                inner.notify.notify_waiters();
                return;
            }
            warn!(session = %id, "push channel saturated, dropping oldest queued notification");
            queue.pop_front();
        }
        queue.push_back(notification);
        drop(queue);
        inner.notify.notify_one();
    }

    /// Sends to every currently-registered channel. Failures on individual
    /// sessions never affect others.
    pub fn broadcast(&self, notification: Notification) {
        let ids: Vec<SessionId> = self.channels.read().keys().copied().collect();
        for id in ids {
            self.send(id, notification.clone());
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;

    #[tokio::test]
    async fn delivers_registered_notification() {
        let hub = NotificationHub::new();
        let id = SessionId::new();
        let mut rx = hub.register(id);
        hub.send(
            id,
            Notification::AccessGranted {
                allocated_domains: vec!["a.com".into()],
            },
        );
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Notification::AccessGranted { .. }));
    }

    #[tokio::test]
    async fn send_to_unregistered_session_is_a_silent_no_op() {
        let hub = NotificationHub::new();
        hub.send(SessionId::new(), Notification::CookiesCleared { at: chrono::Utc::now() });
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_session() {
        let hub = NotificationHub::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut ra = hub.register(a);
        let mut rb = hub.register(b);
        hub.broadcast(Notification::CookiesCleared { at: chrono::Utc::now() });
        assert!(ra.recv().await.is_some());
        assert!(rb.recv().await.is_some());
    }

    #[tokio::test]
    async fn saturated_channel_drops_oldest_frame_and_keeps_newest() {
        let hub = NotificationHub::new();
        let id = SessionId::new();
        let mut rx = hub.register(id);
        for i in 0..CHANNEL_CAPACITY {
            hub.send(
                id,
                Notification::QueuePosition { position: i },
            );
        }
        // Channel is now full; this send must evict position 0, not itself.
        hub.send(id, Notification::QueuePosition { position: 999 });

        let first = rx.recv().await.unwrap();
        match first {
            Notification::QueuePosition { position } => assert_eq!(position, 1),
            other => panic!("unexpected first queued notification: {other:?}"),
        }

        let mut last = first;
        while let Ok(next) = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            rx.recv(),
        )
        .await
        {
            let Some(next) = next else { break };
            last = next;
        }
        match last {
            Notification::QueuePosition { position } => assert_eq!(position, 999),
            other => panic!("unexpected last queued notification: {other:?}"),
        }
    }
}
