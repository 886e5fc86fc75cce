//! WAL configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Where collected log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingBackend {
    /// Append-only log files with fsync
    File,
    /// Diagnostic backend: records are collected and counted, never persisted
    None,
}

impl FromStr for LoggingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown logging backend: {other}")),
        }
    }
}

impl fmt::Display for LoggingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::None => f.write_str("none"),
        }
    }
}

/// WAL configuration
#[derive(Debug, Clone, Serialize)]
pub struct WalConfig {
    /// Logging backend selection
    pub backend: LoggingBackend,

    /// Block committing transactions until their commit id is durable
    pub sync_commit: bool,

    /// Pause between frontend flush cycles (milliseconds)
    pub flush_interval_ms: u64,

    /// Number of transfer buffer slots in the pool (rounded up to a power of two)
    pub pool_capacity: usize,

    /// Soft capacity of one transfer buffer in bytes
    pub buffer_capacity: usize,

    /// Directory holding the log files
    pub log_dir: PathBuf,

    /// Size after which the active log file is rotated (bytes)
    pub rotation_size: u64,

    /// Attempts a backend makes on a full pool before giving up
    pub handoff_spin_limit: u32,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            backend: LoggingBackend::File,
            sync_commit: false,
            flush_interval_ms: 1000,
            pool_capacity: 32,
            buffer_capacity: 64 * 1024,
            log_dir: PathBuf::from("./wal"),
            rotation_size: 1024 * 1024,
            handoff_spin_limit: 1024,
        }
    }
}

impl WalConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            backend: std::env::var("WAL_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backend),
            sync_commit: std::env::var("WAL_SYNC_COMMIT")
                .ok()
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.sync_commit),
            flush_interval_ms: std::env::var("WAL_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.flush_interval_ms),
            pool_capacity: std::env::var("WAL_POOL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_capacity),
            buffer_capacity: std::env::var("WAL_BUFFER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.buffer_capacity),
            log_dir: std::env::var("WAL_LOG_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            rotation_size: std::env::var("WAL_ROTATION_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rotation_size),
            handoff_spin_limit: std::env::var("WAL_HANDOFF_SPIN_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.handoff_spin_limit),
        }
    }

    /// Config for the given log directory, everything else default
    #[must_use]
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Flush interval as a `Duration`
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Pool capacity actually used: a power of two, at least 2
    #[must_use]
    pub fn effective_pool_capacity(&self) -> usize {
        self.pool_capacity.max(2).next_power_of_two()
    }
}
