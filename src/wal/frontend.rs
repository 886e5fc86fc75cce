//! Frontend logger - collects backend buffers and makes them durable
//!
//! One frontend per log manager, running on a dedicated thread:
//! 1. `collect`: snapshot every backend, drain the pool, compute a candidate frontier
//! 2. `flush`: write staged buffers and a delimiter, fsync, then publish
//! 3. Park until the flush interval elapses or a backend wakes us

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::buffer::TransferBuffer;
use super::context::{BackendSnapshot, LogContext};
use super::files::LogFileSet;
use super::record::{CommitId, LogRecord};
use super::recovery::{LogRecovery, RecoveryStats};
use crate::config::{LoggingBackend, WalConfig};
use crate::error::WalResult;
use crate::traits::{LogSink, NullSink, RecoveryStorage};

/// Highest commit id that is safe to publish once the collected buffers are durable
///
/// Backends with a transaction in flight cap the result at their watermark.
/// Returns `None` when no backend is registered.
#[must_use]
pub fn compute_candidate(snapshots: &[BackendSnapshot]) -> Option<CommitId> {
    let max_committed = snapshots.iter().map(|s| s.max_committed).max()?;
    let min_watermark = snapshots
        .iter()
        .filter(|s| !s.done)
        .filter_map(|s| s.watermark)
        .min();

    Some(match min_watermark {
        Some(watermark) => watermark.min(max_committed),
        None => max_committed,
    })
}

/// Collects and persists log buffers
pub struct FrontendLogger {
    context: Arc<LogContext>,
    sink: Box<dyn LogSink>,

    /// Buffers collected but not yet written
    staged: Vec<Box<TransferBuffer>>,

    /// Best candidate seen since the last flush
    candidate: Option<CommitId>,

    flush_interval: Duration,

    /// Whether the session-start delimiter has been written
    session_started: bool,

    /// Directory replayed by `recover`; `None` for non-persistent sinks
    log_dir: Option<PathBuf>,
}

impl FrontendLogger {
    /// Build the frontend for the configured backend
    ///
    /// # Errors
    ///
    /// Returns `Io` if the log directory cannot be prepared.
    pub fn new(config: &WalConfig, context: Arc<LogContext>) -> WalResult<Self> {
        let (sink, log_dir): (Box<dyn LogSink>, Option<PathBuf>) = match config.backend {
            LoggingBackend::File => (
                Box::new(LogFileSet::open(&config.log_dir, config.rotation_size)?),
                Some(config.log_dir.clone()),
            ),
            LoggingBackend::None => (Box::new(NullSink::default()), None),
        };

        let mut frontend = Self::with_sink(context, sink, config.flush_interval());
        frontend.log_dir = log_dir;
        Ok(frontend)
    }

    /// Build a frontend writing to an arbitrary sink; `recover` is then a no-op
    #[must_use]
    pub fn with_sink(
        context: Arc<LogContext>,
        sink: Box<dyn LogSink>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            context,
            sink,
            staged: Vec::new(),
            candidate: None,
            flush_interval,
            session_started: false,
            log_dir: None,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<LogContext> {
        &self.context
    }

    /// Number of buffers waiting for the next flush
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Total bytes handed to the sink
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.sink.bytes_written()
    }

    /// Replay the log directory and seed the frontier from it
    ///
    /// # Errors
    ///
    /// See [`LogRecovery::run`].
    pub fn recover(&mut self, storage: &mut dyn RecoveryStorage) -> WalResult<RecoveryStats> {
        let stats = match &self.log_dir {
            Some(dir) => LogRecovery::new(dir.clone()).run(storage)?,
            None => RecoveryStats::default(),
        };
        self.context.frontier().reset(stats.max_commit_id);
        Ok(stats)
    }

    /// Gather handed-off buffers and recompute the candidate frontier
    pub fn collect(&mut self) -> Option<CommitId> {
        self.collect_with(false)
    }

    fn collect_with(&mut self, force_done: bool) -> Option<CommitId> {
        let registry = self.context.registry();
        let snapshots = registry.snapshot(force_done);

        // Everything published in the snapshot was handed off before it
        self.staged.extend(self.context.pool().drain());

        if let Some(candidate) = compute_candidate(&snapshots) {
            self.candidate = Some(self.candidate.map_or(candidate, |c| c.max(candidate)));
        }

        let finished: Vec<u64> = snapshots.iter().filter(|s| s.done).map(|s| s.id).collect();
        if !finished.is_empty() {
            debug!(backends = ?finished, "Unregistering finished backends");
            registry.remove(&finished);
        }

        self.candidate
    }

    /// Write staged buffers, fsync, then publish the new frontier
    ///
    /// Returns the frontier after the flush.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a write or the fsync fails. The frontier is not
    /// advanced and the caller must stop logging.
    pub fn flush(&mut self) -> WalResult<CommitId> {
        let frontier = self.context.frontier();
        let current = frontier.get();
        let target = self.candidate.map_or(current, |c| c.max(current));

        if self.staged.is_empty() && target <= current {
            return Ok(current);
        }

        let started = Instant::now();
        let bytes_before = self.sink.bytes_written();

        if !self.session_started {
            self.sink.append(&LogRecord::session_start(current).encode())?;
            self.session_started = true;
        }

        let mut records = 0;
        for buffer in &self.staged {
            self.sink.append(buffer.as_bytes())?;
            records += buffer.record_count();
        }
        self.sink.append(&LogRecord::delimiter(target).encode())?;

        // The frontier must never get ahead of stable storage
        self.sink.sync()?;
        let published = frontier.advance(target);

        debug!(
            buffers = self.staged.len(),
            records,
            bytes = self.sink.bytes_written() - bytes_before,
            frontier = published,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Flushed log buffers"
        );

        self.staged.clear();
        self.candidate = None;
        self.sink.maybe_rotate()?;
        Ok(published)
    }

    /// Collect with every backend counted as done, flush, and close the sink
    ///
    /// Waiters on commits that did not make it are released with `Degraded`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the final flush or close fails.
    pub fn shutdown(&mut self) -> WalResult<CommitId> {
        self.collect_with(true);
        let result = self.flush().and_then(|published| {
            self.sink.close()?;
            Ok(published)
        });
        self.context.frontier().halt("logging terminated");
        result
    }

    /// Background loop; returns once `stop` is set and the final flush is done
    ///
    /// # Errors
    ///
    /// Returns the first IO error. The frontier is halted before returning,
    /// so no commit waits on a flush that will never happen.
    pub fn run(mut self, stop: &AtomicBool) -> WalResult<()> {
        self.context.set_frontend_thread(Some(thread::current()));
        info!(
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            frontier = self.context.frontier().get(),
            "Frontend logger started"
        );

        let result = self.run_loop(stop).and_then(|()| self.shutdown().map(|_| ()));
        self.context.set_frontend_thread(None);

        match &result {
            Ok(()) => info!(
                frontier = self.context.frontier().get(),
                bytes_written = self.sink.bytes_written(),
                "Frontend logger stopped"
            ),
            Err(e) => {
                error!(error = %e, "Log flush failed, logging halted");
                self.context.frontier().halt(e.to_string());
            }
        }
        result
    }

    fn run_loop(&mut self, stop: &AtomicBool) -> WalResult<()> {
        while !stop.load(Ordering::Acquire) {
            self.collect();
            self.flush()?;
            thread::park_timeout(self.flush_interval);
        }
        Ok(())
    }
}
