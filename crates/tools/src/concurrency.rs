//! Concurrency manager (§4.4 "Concurrency manager").
//!
//! A per-tool semaphore with a FIFO wait queue — `tokio::sync::Semaphore`
//! grants permits in request order, which is exactly the guarantee S6
//! ("concurrency queue ordering") requires. Grounded on the per-key
//! `Semaphore`-map idiom of `SessionLockMap`, generalized from a fixed
//! limit of 1 to a configurable per-tool limit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::descriptor::ToolError;

const DEFAULT_LIMIT: usize = 4;
const DEFAULT_MAX_WAIT_MS: u64 = 30_000;

/// A held concurrency slot. Pass `slot_id` to [`ConcurrencyManager::release_slot`]
/// when the invocation finishes (or drop the manager-returned guard — see
/// [`SlotGuard`] — for automatic release).
pub struct SlotGuard {
    tool_name: String,
    slot_id: String,
}

impl SlotGuard {
    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }
}

/// Per-tool concurrency limits plus the live semaphores and held permits.
pub struct ConcurrencyManager {
    default_limit: usize,
    limits: RwLock<HashMap<String, usize>>,
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
    held: Mutex<HashMap<String, OwnedSemaphorePermit>>,
}

impl ConcurrencyManager {
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit,
            limits: RwLock::new(HashMap::new()),
            semaphores: RwLock::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_limit(&self, tool_name: &str, limit: usize) {
        self.limits.write().insert(tool_name.to_string(), limit);
    }

    fn limit_for(&self, tool_name: &str) -> usize {
        self.limits.read().get(tool_name).copied().unwrap_or(self.default_limit)
    }

    fn semaphore_for(&self, tool_name: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.semaphores.read().get(tool_name) {
            return sem.clone();
        }
        let limit = self.limit_for(tool_name);
        self.semaphores
            .write()
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone()
    }

    /// Acquire a slot for `tool_name`, returning immediately if a permit is
    /// free, otherwise queuing (FIFO) up to `max_wait_ms`. Returns the
    /// wait time actually spent queued alongside the slot handle.
    pub async fn acquire_slot(&self, tool_name: &str, max_wait_ms: u64) -> Result<(SlotGuard, u64), ToolError> {
        let sem = self.semaphore_for(tool_name);
        let started = std::time::Instant::now();

        let permit = tokio::time::timeout(std::time::Duration::from_millis(max_wait_ms), sem.acquire_owned())
            .await
            .map_err(|_| ToolError::ConcurrencyTimeout { tool: tool_name.to_string(), max_wait_ms })?
            .expect("semaphore never closed");

        let wait_ms = started.elapsed().as_millis() as u64;
        let slot_id = uuid::Uuid::new_v4().to_string();
        self.held.lock().insert(slot_id.clone(), permit);

        Ok((SlotGuard { tool_name: tool_name.to_string(), slot_id }, wait_ms))
    }

    /// Release a previously-acquired slot, waking the next FIFO waiter (if
    /// any). If the tool is now fully idle, garbage-collects its semaphore
    /// entry.
    pub fn release_slot(&self, guard: SlotGuard) {
        self.held.lock().remove(&guard.slot_id);

        let semaphores = self.semaphores.read();
        if let Some(sem) = semaphores.get(&guard.tool_name) {
            let limit = self.limit_for(&guard.tool_name);
            if sem.available_permits() == limit {
                drop(semaphores);
                self.semaphores.write().remove(&guard.tool_name);
            }
        }
    }

    /// Number of tools with live bookkeeping (for monitoring/tests).
    pub fn tracked_tool_count(&self) -> usize {
        self.semaphores.read().len()
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

pub const DEFAULT_CONCURRENCY_MAX_WAIT_MS: u64 = DEFAULT_MAX_WAIT_MS;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquire_under_limit_returns_immediately() {
        let mgr = ConcurrencyManager::new(2);
        let (guard, wait_ms) = mgr.acquire_slot("t", 1_000).await.unwrap();
        assert!(wait_ms < 50);
        mgr.release_slot(guard);
    }

    #[tokio::test]
    async fn release_gc_s_idle_tool_bookkeeping() {
        let mgr = ConcurrencyManager::new(1);
        let (guard, _) = mgr.acquire_slot("t", 1_000).await.unwrap();
        assert_eq!(mgr.tracked_tool_count(), 1);
        mgr.release_slot(guard);
        assert_eq!(mgr.tracked_tool_count(), 0);
    }

    #[tokio::test]
    async fn acquire_slot_times_out_when_queue_is_full() {
        let mgr = ConcurrencyManager::new(1);
        let (_guard, _) = mgr.acquire_slot("t", 1_000).await.unwrap();
        let result = mgr.acquire_slot("t", 20).await;
        assert!(matches!(result, Err(ToolError::ConcurrencyTimeout { .. })));
    }

    /// S6 — concurrency queue ordering: limit=2, five acquisitions fired in
    /// order A,B,C,D,E. A,B acquire immediately; C,D,E queue FIFO; active
    /// never exceeds 2; all five eventually acquire exactly once.
    #[tokio::test]
    async fn fifo_queue_ordering_and_active_limit() {
        let mgr = Arc::new(ConcurrencyManager::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let grant_order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for label in ["A", "B", "C", "D", "E"] {
            let mgr = mgr.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            let grant_order = grant_order.clone();
            handles.push(tokio::spawn(async move {
                let (guard, _) = mgr.acquire_slot("T", 5_000).await.unwrap();
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now_active, Ordering::SeqCst);
                grant_order.lock().push(label);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                mgr.release_slot(guard);
            }));
            // Stagger spawns so acquisition order matches spawn order.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(max_active.load(Ordering::SeqCst) <= 2);
        let order = grant_order.lock().clone();
        assert_eq!(order.len(), 5);
        assert_eq!(order, vec!["A", "B", "C", "D", "E"]);
    }
}
