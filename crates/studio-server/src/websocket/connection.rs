//! Per-connection session state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use studio_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::auth::Identity;
use crate::protocol::ServerMessage;

/// One authenticated, long-lived connection.
///
/// Topic membership is owned by the
/// [`SubscriptionRegistry`](crate::registry::SubscriptionRegistry), not by
/// the session itself.
pub struct Session {
    /// Process-local connection handle.
    pub id: ConnectionId,
    /// Verified identity from the handshake.
    pub identity: Identity,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When the handshake completed.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Session {
    /// Create a session writing into `tx`.
    pub fn new(id: ConnectionId, identity: Identity, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// User this session belongs to.
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Queue a pre-serialized frame.
    ///
    /// Returns `false` if the frame was not queued. A full queue counts as a
    /// dropped message; a closed queue means the connection is already gone
    /// and is silently ignored.
    pub fn send(&self, frame: Arc<String>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                warn!(conn_id = %self.id, "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize and queue a server message.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize server message");
                false
            }
        }
    }

    /// Queue a frame, waiting for room instead of dropping it.
    ///
    /// Used for replies the client explicitly asked for. Returns `false`
    /// only when the connection is gone.
    pub async fn send_async(&self, frame: Arc<String>) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Serialize a server message and queue it with [`send_async`](Self::send_async).
    pub async fn send_message_async(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_async(Arc::new(json)).await,
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize server message");
                false
            }
        }
    }

    /// Whether the write side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Messages dropped because the outbound queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a Pong (or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last Pong (or since connect).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::session_for;
    use super::*;

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (session, mut rx) = session_for("u1", 4);
        assert!(session.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_counts_a_drop() {
        let (session, _rx) = session_for("u1", 1);
        assert!(session.send(Arc::new("one".into())));
        assert!(!session.send(Arc::new("two".into())));
        assert_eq!(session.drop_count(), 1);
    }

    #[test]
    fn closed_queue_is_a_silent_no_op() {
        let (session, rx) = session_for("u1", 4);
        drop(rx);
        assert!(session.is_closed());
        assert!(!session.send(Arc::new("late".into())));
        assert_eq!(session.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_message_serializes() {
        let (session, mut rx) = session_for("u1", 4);
        assert!(session.send_message(&ServerMessage::SyncError {
            message: "x".into()
        }));
        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "syncError");
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (session, _rx) = session_for("u1", 4);
        assert!(session.check_alive());
        assert!(!session.check_alive());
        session.mark_alive();
        assert!(session.check_alive());
    }

    #[test]
    fn identity_is_exposed() {
        let (session, _rx) = session_for("u9", 4);
        assert_eq!(session.user_id().as_str(), "u9");
        assert_eq!(session.identity.role, "SUPERADMIN");
    }
}
