//! Per-worker backend logger
//!
//! Each worker thread owns one `BackendLogger`. Records are appended to a
//! private transfer buffer without locking; the buffer moves into the shared
//! pool when it fills up and at every transaction boundary. Only the small
//! per-backend state (watermark, highest handed-off commit) sits behind a
//! mutex, because the frontend must read it atomically across all backends.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::buffer::TransferBuffer;
use super::context::LogContext;
use super::record::{CommitId, Location, LogRecord, TableId, TxnId};
use crate::error::{WalError, WalResult};

/// Backend lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// Registered, not yet acknowledged by a collect
    Sleeping,
    /// Acknowledged by the frontend
    Logging,
    /// Done; no further appends accepted
    Terminating,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sleeping => "sleeping",
            Self::Logging => "logging",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// State the frontend reads during collect
#[derive(Debug)]
pub(crate) struct BackendState {
    pub(crate) status: BackendStatus,
    pub(crate) watermark: Option<CommitId>,
    pub(crate) max_committed: CommitId,
    pub(crate) done: bool,
}

#[derive(Debug)]
pub(crate) struct BackendSlot {
    pub(crate) id: u64,
    pub(crate) state: Mutex<BackendState>,
}

impl BackendSlot {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(BackendState {
                status: BackendStatus::Sleeping,
                watermark: None,
                max_committed: 0,
                done: false,
            }),
        }
    }
}

/// Records one worker thread's transactions
pub struct BackendLogger {
    slot: Arc<BackendSlot>,
    context: Arc<LogContext>,

    /// Local buffer being filled
    buffer: Box<TransferBuffer>,

    /// Commit appended locally, not yet visible to the frontend
    unpublished_commit: Option<CommitId>,

    /// Set once `done` succeeded
    finished: bool,
}

impl BackendLogger {
    /// Register a new backend with the shared logging context
    #[must_use]
    pub fn register(context: &Arc<LogContext>) -> Self {
        let slot = context.registry().register();
        debug!(backend_id = slot.id, "Backend logger registered");

        Self {
            buffer: Box::new(TransferBuffer::new(slot.id, context.buffer_capacity())),
            slot,
            context: Arc::clone(context),
            unpublished_commit: None,
            finished: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    #[must_use]
    pub fn status(&self) -> BackendStatus {
        self.slot.state.lock().status
    }

    /// Current prepared watermark, if a transaction is in flight
    #[must_use]
    pub fn watermark(&self) -> Option<CommitId> {
        self.slot.state.lock().watermark
    }

    /// Publish this backend's safe point
    ///
    /// The watermark is the highest commit id below which this backend has
    /// nothing left to append: its own last handed-off commit, or the
    /// durable frontier if that is higher.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after `done`.
    pub fn prepare(&mut self) -> WalResult<()> {
        let frontier = self.context.frontier().get();
        let mut state = self.slot.state.lock();
        if state.status == BackendStatus::Terminating {
            return Err(WalError::invalid_state("sleeping or logging", state.status));
        }
        state.watermark = Some(state.max_committed.max(frontier));
        Ok(())
    }

    /// Log the start of a transaction, preparing first if needed
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after `done`, or `CapacityExceeded` if a full
    /// buffer could not be handed off.
    pub fn begin(&mut self, txn_id: TxnId) -> WalResult<()> {
        if self.watermark().is_none() {
            self.prepare()?;
        }
        self.append(&LogRecord::begin(txn_id))
    }

    /// Log a new tuple at `location`
    ///
    /// # Errors
    ///
    /// Returns `Framing` if the tuple is too large for one frame; nothing is
    /// logged then. Otherwise see [`BackendLogger::begin`].
    pub fn insert(
        &mut self,
        txn_id: TxnId,
        table: TableId,
        location: Location,
        tuple: &[u8],
    ) -> WalResult<()> {
        LogRecord::check_payload_len(tuple.len())?;
        self.append(&LogRecord::insert(txn_id, table, location, tuple.to_vec()))
    }

    /// Log a tuple moving from `old_location` to `new_location`
    ///
    /// # Errors
    ///
    /// See [`BackendLogger::insert`].
    pub fn update(
        &mut self,
        txn_id: TxnId,
        table: TableId,
        old_location: Location,
        new_location: Location,
        tuple: &[u8],
    ) -> WalResult<()> {
        LogRecord::check_payload_len(tuple.len())?;
        self.append(&LogRecord::update(
            txn_id,
            table,
            old_location,
            new_location,
            tuple.to_vec(),
        ))
    }

    /// Log removal of the tuple at `location`
    ///
    /// # Errors
    ///
    /// See [`BackendLogger::begin`].
    pub fn delete(&mut self, txn_id: TxnId, table: TableId, location: Location) -> WalResult<()> {
        self.append(&LogRecord::delete(txn_id, table, location))
    }

    /// Log a commit and hand the transaction's records to the frontend
    ///
    /// This does not make the transaction durable. With synchronous commit
    /// enabled it then blocks until the frontier reaches `commit_id`.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the pool stayed full (the records are
    /// kept and handed off on the next boundary), or `Degraded` if logging
    /// halted while waiting for durability.
    pub fn commit(&mut self, txn_id: TxnId, commit_id: CommitId) -> WalResult<()> {
        self.append(&LogRecord::commit(txn_id, commit_id))?;
        self.unpublished_commit = Some(
            self.unpublished_commit
                .map_or(commit_id, |pending| pending.max(commit_id)),
        );
        self.finish_transaction()?;

        if self.context.sync_commit() {
            self.context.wake_frontend();
            self.context.frontier().wait_for(commit_id, None)?;
        }
        Ok(())
    }

    /// Log an abort and hand the records to the frontend
    ///
    /// # Errors
    ///
    /// See [`BackendLogger::begin`].
    pub fn abort(&mut self, txn_id: TxnId) -> WalResult<()> {
        self.append(&LogRecord::abort(txn_id))?;
        self.finish_transaction()
    }

    /// Stop contributing to the frontier
    ///
    /// Whatever is buffered is handed off first; the frontend collects it
    /// before dropping this backend from the minimum.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the final buffer could not be handed off.
    pub fn done(&mut self) -> WalResult<()> {
        if self.finished {
            return Ok(());
        }
        self.hand_off()?;

        let mut state = self.slot.state.lock();
        if let Some(commit_id) = self.unpublished_commit.take() {
            state.max_committed = state.max_committed.max(commit_id);
        }
        state.watermark = None;
        state.done = true;
        state.status = BackendStatus::Terminating;
        drop(state);

        self.finished = true;
        debug!(backend_id = self.slot.id, "Backend logger done");
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> WalResult<()> {
        let status = self.status();
        if status == BackendStatus::Terminating {
            return Err(WalError::invalid_state("sleeping or logging", status));
        }

        if !self.buffer.has_room_for(record) {
            self.hand_off()?;
            self.publish(false);
        }
        self.buffer.append(record);
        Ok(())
    }

    fn finish_transaction(&mut self) -> WalResult<()> {
        self.hand_off()?;
        self.publish(true);
        Ok(())
    }

    /// Move the local buffer into the pool, retrying while it is full
    fn hand_off(&mut self) -> WalResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let pool = self.context.pool();
        let fresh = Box::new(TransferBuffer::new(self.slot.id, self.context.buffer_capacity()));
        let mut pending = std::mem::replace(&mut self.buffer, fresh);
        let backoff = Backoff::new();

        for attempt in 0..self.context.handoff_spin_limit() {
            match pool.put(pending) {
                Ok(()) => {
                    if pool.size() * 2 >= pool.capacity() {
                        self.context.wake_frontend();
                    }
                    return Ok(());
                }
                Err(rejected) => {
                    pending = rejected;
                    if attempt == 0 {
                        warn!(
                            backend_id = self.slot.id,
                            capacity = pool.capacity(),
                            "Buffer pool full, waiting for frontend"
                        );
                    }
                    self.context.wake_frontend();
                    if backoff.is_completed() {
                        thread::sleep(Duration::from_micros(50));
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }

        // Keep the records; the next boundary retries
        self.buffer = pending;
        Err(WalError::CapacityExceeded {
            capacity: pool.capacity(),
        })
    }

    /// Make handed-off commits visible to collect
    fn publish(&mut self, end_of_transaction: bool) {
        let mut state = self.slot.state.lock();
        if let Some(commit_id) = self.unpublished_commit.take() {
            state.max_committed = state.max_committed.max(commit_id);
        }
        if end_of_transaction {
            state.watermark = None;
        }
    }
}

impl Drop for BackendLogger {
    fn drop(&mut self) {
        if self.finished || self.status() == BackendStatus::Terminating {
            return;
        }
        if let Err(e) = self.done() {
            warn!(backend_id = self.slot.id, error = %e, "Backend logger dropped with unflushed records");
        }
    }
}

impl fmt::Debug for BackendLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLogger")
            .field("id", &self.slot.id)
            .field("buffered_bytes", &self.buffer.len())
            .finish()
    }
}
