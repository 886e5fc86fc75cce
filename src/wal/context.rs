//! Shared logging state injected into every backend and the frontend
//!
//! One instance per log manager. Holds the buffer pool, the backend registry
//! and the published frontier, so tests can build several independent
//! logging stacks side by side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::Thread;

use parking_lot::{Mutex, RwLock};

use super::backend::{BackendSlot, BackendStatus};
use super::frontier::DurableFrontier;
use super::pool::CircularBufferPool;
use super::record::CommitId;
use crate::config::WalConfig;

/// Point-in-time view of one backend, taken by `collect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSnapshot {
    pub id: u64,
    /// Prepared watermark, `None` when the backend has no transaction in flight
    pub watermark: Option<CommitId>,
    /// Highest commit id whose records are already in the pool
    pub max_committed: CommitId,
    pub done: bool,
}

/// Registered backends, in registration order
#[derive(Debug, Default)]
pub(crate) struct BackendRegistry {
    next_id: AtomicU64,
    backends: RwLock<Vec<Arc<BackendSlot>>>,
}

impl BackendRegistry {
    pub(crate) fn register(&self) -> Arc<BackendSlot> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(BackendSlot::new(id));
        self.backends.write().push(Arc::clone(&slot));
        slot
    }

    /// Snapshot every backend atomically
    ///
    /// All state mutexes are held together (taken in registration order) so
    /// no backend can publish between two others being read. Sleeping
    /// backends are acknowledged as logging. With `force_done` every backend
    /// is treated as done and marked terminating.
    pub(crate) fn snapshot(&self, force_done: bool) -> Vec<BackendSnapshot> {
        let backends = self.backends.read();
        let mut guards: Vec<_> = backends.iter().map(|slot| slot.state.lock()).collect();

        let snapshots = guards
            .iter_mut()
            .zip(backends.iter())
            .map(|(state, slot)| {
                if force_done {
                    state.done = true;
                    state.status = BackendStatus::Terminating;
                } else if state.status == BackendStatus::Sleeping {
                    state.status = BackendStatus::Logging;
                }
                BackendSnapshot {
                    id: slot.id,
                    watermark: state.watermark,
                    max_committed: state.max_committed,
                    done: state.done,
                }
            })
            .collect();
        snapshots
    }

    /// Drop backends whose final records have been collected
    pub(crate) fn remove(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        self.backends.write().retain(|slot| !ids.contains(&slot.id));
    }

    pub(crate) fn len(&self) -> usize {
        self.backends.read().len()
    }
}

/// State shared between a log manager, its frontend and all backends
#[derive(Debug)]
pub struct LogContext {
    pool: CircularBufferPool,
    registry: BackendRegistry,
    frontier: DurableFrontier,
    sync_commit: AtomicBool,
    buffer_capacity: usize,
    handoff_spin_limit: u32,
    frontend_thread: Mutex<Option<Thread>>,
}

impl LogContext {
    #[must_use]
    pub fn new(config: &WalConfig) -> Self {
        Self {
            pool: CircularBufferPool::new(config.effective_pool_capacity()),
            registry: BackendRegistry::default(),
            frontier: DurableFrontier::new(0),
            sync_commit: AtomicBool::new(config.sync_commit),
            buffer_capacity: config.buffer_capacity.max(1),
            handoff_spin_limit: config.handoff_spin_limit.max(1),
            frontend_thread: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &CircularBufferPool {
        &self.pool
    }

    #[must_use]
    pub fn frontier(&self) -> &DurableFrontier {
        &self.frontier
    }

    pub(crate) fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Number of registered backends
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn sync_commit(&self) -> bool {
        self.sync_commit.load(Ordering::Acquire)
    }

    pub fn set_sync_commit(&self, enabled: bool) {
        self.sync_commit.store(enabled, Ordering::Release);
    }

    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub(crate) fn handoff_spin_limit(&self) -> u32 {
        self.handoff_spin_limit
    }

    pub(crate) fn set_frontend_thread(&self, thread: Option<Thread>) {
        *self.frontend_thread.lock() = thread;
    }

    /// Cut the frontend's sleep short
    pub fn wake_frontend(&self) {
        if let Some(thread) = self.frontend_thread.lock().as_ref() {
            thread.unpark();
        }
    }
}
