//! Session registry — the single source of truth for live sessions.
//!
//! Pure storage: a map from session id to [`Session`]. Whether to create,
//! evict, or reap an entry is decided by the callers (dispatcher, admission
//! controller, reaper); the registry only records the outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use portico_domain::trace::TraceEvent;

use crate::transport::CallTransport;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a session. `Closed` is terminal: the id is never
/// reinserted and every later call using it is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Active,
    Closed,
}

/// A single session tracked by the gateway.
///
/// Clones are value snapshots of the bookkeeping fields; the transport is
/// shared, so `transport.is_closed()` stays authoritative across clones.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub transport: Arc<dyn CallTransport>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory session registry.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new active session owning `transport`.
    pub fn create(&self, session_id: &str, transport: Arc<dyn CallTransport>) -> Session {
        let now = Utc::now();
        let session = Session {
            id: session_id.to_owned(),
            transport,
            created_at: now,
            last_activity: now,
            state: SessionState::Active,
        };

        let mut sessions = self.sessions.write();
        sessions.insert(session_id.to_owned(), session.clone());

        TraceEvent::SessionCreated {
            session_id: session_id.to_owned(),
        }
        .emit();

        session
    }

    /// Look up a session by id.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Remove a session. Removing an id that is not present is a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().remove(session_id)
    }

    /// Transition a session to `Closed` in place, if present.
    pub fn mark_closed(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.state = SessionState::Closed;
        }
    }

    /// Refresh `last_activity` to now.
    pub fn touch(&self, session_id: &str) {
        self.touch_at(session_id, Utc::now());
    }

    /// Refresh `last_activity` to a caller-supplied instant.
    pub fn touch_at(&self, session_id: &str, when: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = when;
        }
    }

    /// List all sessions.
    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// The session with the smallest `last_activity`, if any. Ties are
    /// broken by map iteration order.
    pub fn least_recently_active(&self) -> Option<Session> {
        self.sessions
            .read()
            .values()
            .min_by_key(|s| s.last_activity)
            .cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn registry_with(ids: &[&str]) -> SessionRegistry {
        let registry = SessionRegistry::new();
        for id in ids {
            registry.create(id, Arc::new(LoopbackTransport::new()));
        }
        registry
    }

    #[test]
    fn create_then_get() {
        let registry = registry_with(&["s1"]);
        let session = registry.get("s1").unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = registry_with(&["s1"]);
        assert!(registry.remove("s1").is_some());
        assert!(registry.remove("s1").is_none());
        assert!(registry.remove("never-existed").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn touch_at_moves_last_activity() {
        let registry = registry_with(&["s1"]);
        let when = Utc::now() - chrono::Duration::minutes(10);
        registry.touch_at("s1", when);
        assert_eq!(registry.get("s1").unwrap().last_activity, when);
    }

    #[test]
    fn least_recently_active_picks_the_stalest() {
        let registry = registry_with(&["a", "b", "c"]);
        let now = Utc::now();
        registry.touch_at("a", now - chrono::Duration::minutes(5));
        registry.touch_at("b", now - chrono::Duration::minutes(30));
        registry.touch_at("c", now - chrono::Duration::minutes(1));
        assert_eq!(registry.least_recently_active().unwrap().id, "b");
    }

    #[test]
    fn mark_closed_transitions_in_place() {
        let registry = registry_with(&["s1"]);
        registry.mark_closed("s1");
        assert_eq!(registry.get("s1").unwrap().state, SessionState::Closed);
        // Unknown ids are a no-op.
        registry.mark_closed("missing");
    }
}
