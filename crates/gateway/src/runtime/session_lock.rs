//! Per-session concurrency control (§4.3, §8 invariant 4, Open Question a).
//!
//! Ensures only one turn runs per session at a time. A second message
//! arriving while a turn is in-flight queues behind it (queue depth = 1);
//! a third concurrent `user_query` for the same session is rejected with
//! `SessionBusy` rather than queuing indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct SessionSlot {
    semaphore: Arc<Semaphore>,
    /// `true` while one caller is already queued waiting for the permit —
    /// a second simultaneous waiter is rejected rather than queued.
    has_waiter: AtomicBool,
}

impl SessionSlot {
    fn new() -> Self {
        Self { semaphore: Arc::new(Semaphore::new(1)), has_waiter: AtomicBool::new(false) }
    }
}

/// Manages per-session run locks.
///
/// Each session key maps to a `Semaphore(1)` plus a waiter flag. Acquiring
/// the permit ensures exclusive access for one turn at a time; at most one
/// other caller may be queued behind it.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Acquire the run lock for a session.
    ///
    /// Returns `Ok(permit)` when the lock is acquired (hold it for the
    /// duration of the turn — it auto-releases on drop).
    ///
    /// Returns `Err(SessionBusy)` immediately if a turn is already running
    /// AND another caller is already queued waiting for it (prevents
    /// unbounded queue growth, per Open Question (a)).
    pub async fn acquire(&self, session_key: &str) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let slot = {
            let mut locks = self.locks.lock();
            locks.entry(session_key.to_owned()).or_insert_with(|| Arc::new(SessionSlot::new())).clone()
        };

        if let Ok(permit) = slot.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        if slot.has_waiter.swap(true, Ordering::AcqRel) {
            return Err(SessionBusy);
        }

        let result = slot.semaphore.clone().acquire_owned().await.map_err(|_| SessionBusy);
        slot.has_waiter.store(false, Ordering::Release);
        result
    }

    /// Non-blocking check: would a call to [`Self::acquire`] reject
    /// immediately with `SessionBusy` right now? Used by callers that must
    /// not block (e.g. an event-bus rule handler) to decide whether to
    /// spawn a task that awaits the real acquire.
    pub fn is_busy(&self, session_key: &str) -> bool {
        match self.locks.lock().get(session_key) {
            Some(slot) => slot.semaphore.available_permits() == 0 && slot.has_waiter.load(Ordering::Acquire),
            None => false,
        }
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks for sessions that aren't actively held (cleanup).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, slot| slot.semaphore.available_permits() == 0);
    }
}

/// Error returned when a session is busy (turn already in progress + queued).
#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy — a turn is already in progress")
    }
}

impl std::error::Error for SessionBusy {}

impl From<SessionBusy> for ax_domain::error::Error {
    fn from(_: SessionBusy) -> Self {
        ax_domain::error::Error::Busy("session is busy — a turn is already in progress".to_string())
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

        assert_eq!(map.session_count(), 2);

        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_waits() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await.unwrap();

        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await.unwrap();
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);

        let result = handle.await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn third_concurrent_caller_is_rejected_busy() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await.unwrap();

        let waiter = tokio::spawn(async move { map2.acquire("s1").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // A third caller arrives while one is already queued.
        let third = map.acquire("s1").await;
        assert!(matches!(third, Err(SessionBusy)));

        drop(p1);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn waiter_slot_frees_up_after_it_completes() {
        let map = SessionLockMap::new();
        let p1 = map.acquire("s1").await.unwrap();

        let map = Arc::new(map);
        let map2 = map.clone();
        let waiter = tokio::spawn(async move { map2.acquire("s1").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(p1);
        let p2 = waiter.await.unwrap().unwrap();
        drop(p2);

        // Waiter flag should have been cleared — a fresh caller can queue again.
        let p3 = map.acquire("s1").await.unwrap();
        drop(p3);
    }

    #[tokio::test]
    async fn is_busy_reflects_held_plus_queued_state() {
        let map = Arc::new(SessionLockMap::new());
        assert!(!map.is_busy("s1"));

        let p1 = map.acquire("s1").await.unwrap();
        assert!(!map.is_busy("s1")); // held but nobody queued yet

        let map2 = map.clone();
        let waiter = tokio::spawn(async move { map2.acquire("s1").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(map.is_busy("s1"));

        drop(p1);
        assert!(waiter.await.unwrap().is_ok());
    }
}
