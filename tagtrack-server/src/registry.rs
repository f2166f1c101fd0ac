//! Connection registry: logical client id to live outbound handle.
//!
//! Guarded by its own lock, never taken while the tag cache lock is held.
//! The lock is a std `RwLock` because no operation awaits while holding it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a payload could not be handed to a session.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("session closed")]
    Closed,
}

/// A registered client connection.
///
/// Cloning copies the handle, not the connection. The outbound queue is
/// drained by the connection's own writer task.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: String,
    /// Identity of the underlying connection, assigned at accept time.
    pub session_uid: Uuid,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientSession {
    pub fn new(
        id: impl Into<String>,
        session_uid: Uuid,
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id: id.into(),
            session_uid,
            remote_addr,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// Queue `payload` for this peer without waiting.
    pub fn try_send(&self, payload: Bytes) -> Result<(), DeliveryError> {
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Whether the connection's writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Map of client id to its single active session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, ClientSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its id, returning the session it replaced.
    pub fn register(&self, session: ClientSession) -> Option<ClientSession> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session)
    }

    /// Remove whatever session is registered under `id`.
    pub fn unregister(&self, id: &str) -> Option<ClientSession> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Remove `id` only if it still belongs to the connection `session_uid`.
    ///
    /// A connection closing after another one took over its id must not
    /// evict the newer session.
    pub fn unregister_session(&self, id: &str, session_uid: Uuid) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(id) {
            Some(current) if current.session_uid == session_uid => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every registered session.
    pub fn snapshot(&self) -> Vec<ClientSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ClientSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn session(id: &str, port: u16) -> (ClientSession, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        (ClientSession::new(id, Uuid::new_v4(), addr(port), tx), rx)
    }

    #[test]
    fn test_register_replaces_existing_id() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = session("c1", 1000);
        let (second, _rx2) = session("c1", 1001);
        let second_uid = second.session_uid;

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second).unwrap();
        assert_eq!(replaced.session_uid, first.session_uid);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").unwrap().session_uid, second_uid);
    }

    #[test]
    fn test_unregister_session_ignores_stale_owner() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = session("c1", 1000);
        let (second, _rx2) = session("c1", 1001);
        let first_uid = first.session_uid;
        let second_uid = second.session_uid;
        registry.register(first);
        registry.register(second);

        assert!(!registry.unregister_session("c1", first_uid));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister_session("c1", second_uid));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_lock() {
        let registry = ConnectionRegistry::new();
        let (a, _rxa) = session("a", 1);
        let (b, _rxb) = session("b", 2);
        registry.register(a);
        registry.register(b);

        let snapshot = registry.snapshot();
        // Mutating while holding the snapshot must not deadlock.
        registry.unregister("a");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_try_send_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let session = ClientSession::new("c", Uuid::new_v4(), addr(1), tx);

        assert!(session.try_send(Bytes::from_static(b"a")).is_ok());
        assert_eq!(
            session.try_send(Bytes::from_static(b"b")),
            Err(DeliveryError::QueueFull)
        );
        drop(rx);
        assert!(session.is_closed());
        assert_eq!(
            session.try_send(Bytes::from_static(b"c")),
            Err(DeliveryError::Closed)
        );
    }
}
