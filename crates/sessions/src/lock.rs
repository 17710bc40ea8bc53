//! Per-session call serialization.
//!
//! Two calls racing on one session id would interleave writes on the same
//! transport. Each session id maps to a `Semaphore(1)`; routed calls take
//! the permit in arrival order, so operations against the same session are
//! serialized while different sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use portico_domain::error::{Error, Result};

/// Manages per-session call locks.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the call lock for a session, waiting behind any in-flight
    /// call. The permit auto-releases on drop.
    pub async fn acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        sem.acquire_owned()
            .await
            .map_err(|_| Error::Other("session lock closed".into()))
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries that are not currently held. Entries for live
    /// sessions re-create themselves on the next call.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();

        let permit1 = map.acquire("s1").await.unwrap();
        drop(permit1);

        let permit2 = map.acquire("s1").await.unwrap();
        drop(permit2);
    }

    #[tokio::test]
    async fn different_sessions_concurrent() {
        let map = Arc::new(SessionLockMap::new());

        let p1 = map.acquire("s1").await.unwrap();
        let p2 = map.acquire("s2").await.unwrap();

        // Both acquired simultaneously.
        assert_eq!(map.session_count(), 2);

        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_waits_its_turn() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await.unwrap();

        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await.unwrap();
            42
        });

        // Give the waiter a moment to queue.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        drop(p1);

        let result = handle.await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = SessionLockMap::new();

        let permit = map.acquire("held").await.unwrap();
        drop(map.acquire("idle").await.unwrap());
        assert_eq!(map.session_count(), 2);

        map.prune_idle();
        assert_eq!(map.session_count(), 1);

        drop(permit);
        map.prune_idle();
        assert_eq!(map.session_count(), 0);
    }
}
