//! Per-process subscription registry.
//!
//! Owns session lifetime and topic membership. Both indexes (session → topics
//! and topic → sessions) live behind one lock so every mutation is atomic with
//! respect to fan-out reads. The lock is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use studio_core::{ConnectionId, Topic, UserId};
use tracing::debug;

use crate::websocket::connection::Session;

struct Membership {
    session: Arc<Session>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct Indexes {
    sessions: HashMap<ConnectionId, Membership>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

impl Indexes {
    fn unindex(&mut self, topic: &Topic, id: &ConnectionId) {
        if let Some(members) = self.topics.get_mut(topic) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = self.topics.remove(topic);
            }
        }
    }
}

/// Map from live sessions to the topics they follow.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Indexes>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with no topics.
    pub fn insert(&self, session: Arc<Session>) {
        let mut inner = self.inner.write();
        let id = session.id.clone();
        let _ = inner.sessions.insert(
            id,
            Membership {
                session,
                topics: HashSet::new(),
            },
        );
    }

    /// Add `topic` to a session's set.
    ///
    /// Idempotent. Returns `true` if the session was not already a member;
    /// an unknown session is left untouched and yields `false`.
    pub fn join(&self, id: &ConnectionId, topic: Topic) -> bool {
        let mut inner = self.inner.write();
        let Some(membership) = inner.sessions.get_mut(id) else {
            return false;
        };
        if !membership.topics.insert(topic.clone()) {
            return false;
        }
        debug!(conn_id = %id, topic = %topic, "joined topic");
        let _ = inner.topics.entry(topic).or_default().insert(id.clone());
        true
    }

    /// Remove `topic` from a session's set. Idempotent.
    pub fn leave(&self, id: &ConnectionId, topic: &Topic) -> bool {
        let mut inner = self.inner.write();
        let removed = inner
            .sessions
            .get_mut(id)
            .is_some_and(|m| m.topics.remove(topic));
        if removed {
            inner.unindex(topic, id);
            debug!(conn_id = %id, topic = %topic, "left topic");
        }
        removed
    }

    /// Remove a session and every membership it holds.
    pub fn drop_session(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let membership = inner.sessions.remove(id)?;
        for topic in &membership.topics {
            inner.unindex(topic, id);
        }
        Some(membership.session)
    }

    /// Sessions subscribed to `topic`, as a snapshot taken under the lock.
    pub fn subscribers(&self, topic: &Topic) -> Vec<Arc<Session>> {
        let inner = self.inner.read();
        inner.topics.get(topic).map_or_else(Vec::new, |ids| {
            ids.iter()
                .filter_map(|id| inner.sessions.get(id))
                .map(|m| Arc::clone(&m.session))
                .collect()
        })
    }

    /// Whether a session currently follows `topic`.
    pub fn is_subscribed(&self, id: &ConnectionId, topic: &Topic) -> bool {
        self.inner
            .read()
            .sessions
            .get(id)
            .is_some_and(|m| m.topics.contains(topic))
    }

    /// Topics a session follows, sorted.
    pub fn topics_of(&self, id: &ConnectionId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .inner
            .read()
            .sessions
            .get(id)
            .map(|m| m.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Look up a live session.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(id).map(|m| Arc::clone(&m.session))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.read().topics.len()
    }

    /// Read-only view of every live session in this process.
    pub fn stats(&self) -> ConnectionStats {
        let inner = self.inner.read();
        let mut per_session: Vec<SessionStats> = inner
            .sessions
            .values()
            .map(|m| SessionStats {
                connection_id: m.session.id.clone(),
                user_id: m.session.identity.user_id.clone(),
                role: m.session.identity.role.clone(),
                subscriptions: m.topics.len(),
                connected_secs: m.session.connected_at.elapsed().as_secs(),
            })
            .collect();
        per_session.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        ConnectionStats {
            total_sessions: per_session.len(),
            per_session,
        }
    }

    /// Drop every session. Used at teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.sessions.clear();
        inner.topics.clear();
    }
}

/// Diagnostics snapshot of local sessions. Not aggregated across processes.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Live sessions in this process.
    pub total_sessions: usize,
    /// One row per session, ordered by connection id.
    pub per_session: Vec<SessionStats>,
}

/// One row of [`ConnectionStats`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Process-local connection handle.
    pub connection_id: ConnectionId,
    /// Identity of the connected user.
    pub user_id: UserId,
    /// Role from the handshake credential.
    pub role: String,
    /// Number of topics joined.
    pub subscriptions: usize,
    /// Seconds since connect.
    pub connected_secs: u64,
}
