//! Log manager - lifecycle of one logging subsystem
//!
//! ```text
//! Invalid -> Standby -> Recovery -> Logging -> Terminating -> Sleep
//!                           |           |
//!                           +-> Degraded <-+
//! ```
//!
//! Backends can only be handed out while `Logging`. An IO failure in the
//! frontend or a protocol violation during recovery moves the manager to
//! `Degraded`, where no further durability is promised.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::traits::{LogSink, RecoveryStorage};
use crate::wal::{BackendLogger, CommitId, FrontendLogger, LogContext, RecoveryStats};

/// Name of the frontend thread
pub const FRONTEND_THREAD_NAME: &str = "wal-frontend";

/// Lifecycle status of a `LogManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingStatus {
    Invalid,
    Standby,
    Recovery,
    Logging,
    Terminating,
    /// Terminated cleanly
    Sleep,
    /// Logging halted after a failure
    Degraded,
}

impl fmt::Display for LoggingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Standby => "standby",
            Self::Recovery => "recovery",
            Self::Logging => "logging",
            Self::Terminating => "terminating",
            Self::Sleep => "sleep",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Coordinates the frontend, the backends and the published frontier
pub struct LogManager {
    config: WalConfig,
    status: Mutex<LoggingStatus>,
    context: Arc<LogContext>,

    /// Sink used instead of the configured backend
    sink_override: Mutex<Option<Box<dyn LogSink>>>,

    /// Frontend between standby and start of logging
    frontend: Mutex<Option<FrontendLogger>>,

    /// Frontend thread while logging
    worker: Mutex<Option<JoinHandle<WalResult<()>>>>,

    stop: Arc<AtomicBool>,
}

impl LogManager {
    #[must_use]
    pub fn new(config: WalConfig) -> Self {
        let context = Arc::new(LogContext::new(&config));
        Self {
            config,
            status: Mutex::new(LoggingStatus::Invalid),
            context,
            sink_override: Mutex::new(None),
            frontend: Mutex::new(None),
            worker: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Manager whose frontend writes to `sink`; recovery then finds no files
    #[must_use]
    pub fn with_sink(config: WalConfig, sink: Box<dyn LogSink>) -> Self {
        let manager = Self::new(config);
        *manager.sink_override.lock() = Some(sink);
        manager
    }

    #[must_use]
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Shared state, for wiring custom frontends or inspecting the pool
    #[must_use]
    pub fn context(&self) -> &Arc<LogContext> {
        &self.context
    }

    /// Current status
    ///
    /// A frontend failure is noticed here and reported as `Degraded`.
    #[must_use]
    pub fn status(&self) -> LoggingStatus {
        let mut status = self.status.lock();
        if *status == LoggingStatus::Logging && self.context.frontier().is_halted() {
            *status = LoggingStatus::Degraded;
            info!(from = %LoggingStatus::Logging, to = %LoggingStatus::Degraded, "Logging status changed");
        }
        *status
    }

    fn transition(&self, from: &[LoggingStatus], to: LoggingStatus) -> WalResult<()> {
        let mut status = self.status.lock();
        if !from.contains(&status) {
            return Err(WalError::invalid_state(
                from.iter().map(ToString::to_string).collect::<Vec<_>>().join(" or "),
                *status,
            ));
        }
        info!(from = %*status, to = %to, "Logging status changed");
        *status = to;
        Ok(())
    }

    fn degrade(&self, reason: &WalError) {
        let mut status = self.status.lock();
        info!(from = %*status, to = %LoggingStatus::Degraded, reason = %reason, "Logging status changed");
        *status = LoggingStatus::Degraded;
        self.context.frontier().halt(reason.to_string());
    }

    /// Create the frontend and enter `Standby`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the manager is `Invalid`, or `Io` if
    /// the log directory cannot be prepared (the manager is then `Degraded`).
    pub fn standby_logging(&self) -> WalResult<()> {
        self.transition(&[LoggingStatus::Invalid], LoggingStatus::Standby)?;

        let frontend = match self.sink_override.lock().take() {
            Some(sink) => Ok(FrontendLogger::with_sink(
                Arc::clone(&self.context),
                sink,
                self.config.flush_interval(),
            )),
            None => FrontendLogger::new(&self.config, Arc::clone(&self.context)),
        };

        match frontend {
            Ok(frontend) => {
                *self.frontend.lock() = Some(frontend);
                Ok(())
            }
            Err(e) => {
                self.degrade(&e);
                Err(e)
            }
        }
    }

    /// Replay the log into `storage` and seed the frontier
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `Standby`. Any recovery failure
    /// leaves the manager `Degraded`.
    pub fn start_recovery(&self, storage: &mut dyn RecoveryStorage) -> WalResult<RecoveryStats> {
        self.transition(&[LoggingStatus::Standby], LoggingStatus::Recovery)?;

        let mut frontend = self.frontend.lock();
        let Some(frontend) = frontend.as_mut() else {
            let err = WalError::invalid_state("frontend", "none");
            self.degrade(&err);
            return Err(err);
        };

        frontend.recover(storage).inspect_err(|e| self.degrade(e))
    }

    /// Start the frontend thread and accept backends
    ///
    /// # Errors
    ///
    /// Returns `Degraded` after a failed recovery, `InvalidState` unless in
    /// `Recovery`, or `Io` if the thread cannot be spawned.
    pub fn start_logging(&self) -> WalResult<()> {
        if self.status() == LoggingStatus::Degraded {
            return Err(WalError::Degraded("recovery did not complete".to_string()));
        }
        self.transition(&[LoggingStatus::Recovery], LoggingStatus::Logging)?;

        let Some(frontend) = self.frontend.lock().take() else {
            let err = WalError::invalid_state("frontend", "none");
            self.degrade(&err);
            return Err(err);
        };

        let stop = Arc::clone(&self.stop);
        let spawned = thread::Builder::new()
            .name(FRONTEND_THREAD_NAME.to_string())
            .spawn(move || frontend.run(&stop));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = WalError::Io(e);
                self.degrade(&err);
                Err(err)
            }
        }
    }

    /// Register a backend logger for the calling worker
    ///
    /// Every call registers a new backend. A worker calls this once and keeps
    /// the logger for its lifetime, moving it onto its own thread; dropping
    /// it marks the backend done. Registering one per transaction works but
    /// grows the set of backends the frontend has to snapshot until their
    /// final buffers are collected.
    ///
    /// # Errors
    ///
    /// Returns `Degraded` if logging halted, `InvalidState` unless `Logging`.
    pub fn backend_logger(&self) -> WalResult<BackendLogger> {
        match self.status() {
            LoggingStatus::Logging => Ok(BackendLogger::register(&self.context)),
            LoggingStatus::Degraded => Err(WalError::Degraded("logging halted".to_string())),
            other => Err(WalError::invalid_state(LoggingStatus::Logging, other)),
        }
    }

    /// Highest commit id that survives a crash
    #[must_use]
    pub fn persistent_flushed_commit_id(&self) -> CommitId {
        self.context.frontier().get()
    }

    /// Make `commit` block until durable (or stop blocking)
    pub fn set_sync_commit(&self, enabled: bool) {
        info!(enabled, "Sync commit changed");
        self.context.set_sync_commit(enabled);
    }

    #[must_use]
    pub fn sync_commit(&self) -> bool {
        self.context.sync_commit()
    }

    /// Block until `commit_id` is durable or `timeout` elapses
    ///
    /// Returns whether the commit is durable.
    ///
    /// # Errors
    ///
    /// Returns `Degraded` if logging halts first.
    pub fn wait_for_durable(&self, commit_id: CommitId, timeout: Option<Duration>) -> WalResult<bool> {
        self.context.wake_frontend();
        self.context.frontier().wait_for(commit_id, timeout)
    }

    /// Buffers waiting in the pool
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.context.pool().size()
    }

    /// Drain all backends, flush a last time, and stop the frontend
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns the frontend's failure, if it had one.
    pub fn terminate(&self) -> WalResult<()> {
        match self.status() {
            LoggingStatus::Invalid | LoggingStatus::Sleep => return Ok(()),
            LoggingStatus::Logging => {
                self.transition(&[LoggingStatus::Logging], LoggingStatus::Terminating)?;
            }
            LoggingStatus::Standby | LoggingStatus::Recovery => {
                self.frontend.lock().take();
                self.context.frontier().halt("logging terminated");
                return self.transition(
                    &[LoggingStatus::Standby, LoggingStatus::Recovery],
                    LoggingStatus::Sleep,
                );
            }
            LoggingStatus::Terminating | LoggingStatus::Degraded => {}
        }

        self.stop.store(true, Ordering::Release);
        self.context.wake_frontend();

        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        let result = handle
            .join()
            .unwrap_or_else(|_| Err(WalError::Degraded("frontend thread panicked".to_string())));

        match &result {
            Ok(()) => {
                // A concurrent failure may already have degraded us
                let _ = self.transition(&[LoggingStatus::Terminating], LoggingStatus::Sleep);
            }
            Err(e) => {
                if self.status() != LoggingStatus::Degraded {
                    self.degrade(e);
                }
            }
        }
        result
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        if self.worker.get_mut().is_some() {
            if let Err(e) = self.terminate() {
                warn!(error = %e, "Log manager dropped after frontend failure");
            }
        }
    }
}

impl fmt::Debug for LogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogManager")
            .field("status", &*self.status.lock())
            .field("frontier", &self.context.frontier().get())
            .field("backends", &self.context.backend_count())
            .finish()
    }
}
