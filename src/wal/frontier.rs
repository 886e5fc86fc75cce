//! Published durability frontier
//!
//! Written by the frontend after each fsync, read by any thread that needs to
//! know whether a commit id is crash-safe. The store uses Release and loads
//! use Acquire, so a reader that sees a new value also sees everything the
//! flush that produced it wrote.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::record::CommitId;
use crate::error::{WalError, WalResult};

/// Highest commit id guaranteed recoverable after a crash
#[derive(Debug, Default)]
pub struct DurableFrontier {
    value: AtomicU64,
    halted: AtomicBool,
    halt_reason: Mutex<Option<String>>,
    lock: Mutex<()>,
    changed: Condvar,
}

impl DurableFrontier {
    #[must_use]
    pub fn new(initial: CommitId) -> Self {
        Self {
            value: AtomicU64::new(initial),
            ..Self::default()
        }
    }

    /// Current frontier
    #[must_use]
    pub fn get(&self) -> CommitId {
        self.value.load(Ordering::Acquire)
    }

    /// Raise the frontier to `candidate` if that is higher
    ///
    /// Returns the frontier after the call. Never moves it backwards.
    pub fn advance(&self, candidate: CommitId) -> CommitId {
        let previous = self.value.fetch_max(candidate, Ordering::AcqRel);
        if candidate > previous {
            let _guard = self.lock.lock();
            self.changed.notify_all();
        }
        previous.max(candidate)
    }

    /// Seed the frontier from recovery, before any backend runs
    pub(crate) fn reset(&self, value: CommitId) {
        self.value.store(value, Ordering::Release);
        self.halted.store(false, Ordering::Release);
        *self.halt_reason.lock() = None;
    }

    /// Stop promising durability and release every waiter
    pub fn halt(&self, reason: impl Into<String>) {
        *self.halt_reason.lock() = Some(reason.into());
        self.halted.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.changed.notify_all();
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn degraded(&self) -> WalError {
        let reason = self
            .halt_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "logging halted".to_string());
        WalError::Degraded(reason)
    }

    /// Block until `commit_id` is durable
    ///
    /// Returns `Ok(false)` if `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Degraded` if logging halts before the commit is durable.
    pub fn wait_for(&self, commit_id: CommitId, timeout: Option<Duration>) -> WalResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock();

        loop {
            if self.get() >= commit_id {
                return Ok(true);
            }
            if self.is_halted() {
                return Err(self.degraded());
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        return Ok(self.get() >= commit_id);
                    }
                }
                None => self.changed.wait(&mut guard),
            }
        }
    }
}
