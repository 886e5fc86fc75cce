//! Test fixtures and logging stack setup

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use wal_core::traits::NullSink;
use wal_core::wal::{log_file_path, LogContext};
use wal_core::{
    FrontendLogger, LogManager, LogRecord, LogRecovery, MemoryStore, RecoveryStats, TableId,
    WalConfig,
};

pub const ORDERS: TableId = TableId::new(1, 10);
pub const ITEMS: TableId = TableId::new(1, 11);

/// Config over `dir` with a short flush interval
pub fn test_config(dir: &Path) -> WalConfig {
    WalConfig {
        flush_interval_ms: 5,
        ..WalConfig::with_log_dir(dir)
    }
}

/// Frontend and context driven by hand, writing nowhere
pub fn manual_frontend() -> (FrontendLogger, Arc<LogContext>) {
    let context = Arc::new(LogContext::new(&WalConfig::default()));
    let frontend = FrontendLogger::with_sink(
        Arc::clone(&context),
        Box::new(NullSink::default()),
        Duration::from_millis(5),
    );
    (frontend, context)
}

/// Frontend and context driven by hand, writing log files into `dir`
pub fn manual_file_frontend(dir: &Path) -> (FrontendLogger, Arc<LogContext>) {
    let config = test_config(dir);
    let context = Arc::new(LogContext::new(&config));
    let frontend =
        FrontendLogger::new(&config, Arc::clone(&context)).expect("Failed to open log directory");
    (frontend, context)
}

/// Run a manager through standby, recovery and into logging
pub fn start_manager(config: WalConfig) -> (LogManager, MemoryStore, RecoveryStats) {
    let manager = LogManager::new(config);
    let mut store = MemoryStore::new();
    manager.standby_logging().expect("standby failed");
    let stats = manager.start_recovery(&mut store).expect("recovery failed");
    manager.start_logging().expect("start logging failed");
    (manager, store, stats)
}

/// Replay `dir` into a fresh store
pub fn recover_dir(dir: &Path) -> (MemoryStore, RecoveryStats) {
    let mut store = MemoryStore::new();
    let stats = LogRecovery::new(dir)
        .run(&mut store)
        .expect("recovery failed");
    (store, stats)
}

/// Write `records` as log file `number`, bypassing the frontend
pub fn write_log_file(dir: &Path, number: u64, records: &[LogRecord]) -> PathBuf {
    let mut bytes = Vec::new();
    for record in records {
        record.encode_into(&mut bytes);
    }
    let path = log_file_path(dir, number);
    fs::write(&path, bytes).expect("Failed to write log file");
    path
}

/// Tuple bytes for row `n`
pub fn row(n: u64) -> Vec<u8> {
    format!("row-{n}").into_bytes()
}
