//! Log manager lifecycle, synchronous commit and failure handling

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::*;
use wal_core::wal::list_log_files;
use wal_core::{
    LogManager, LogSink, LoggingBackend, LoggingStatus, Location, MemoryStore, WalConfig, WalError,
};

/// Sink whose `sync` starts failing after a number of successful calls
struct FailingSink {
    syncs_left: Arc<AtomicUsize>,
    bytes: u64,
}

impl LogSink for FailingSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        let left = self.syncs_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "injected fsync failure"));
        }
        self.syncs_left.store(left - 1, Ordering::SeqCst);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

#[test]
fn test_sync_commit_waits_for_durability() {
    let dir = tempdir().unwrap();
    let config = WalConfig {
        sync_commit: true,
        // Long interval: only the commit's wake-up can make this finish quickly
        flush_interval_ms: 5_000,
        ..test_config(dir.path())
    };
    let (manager, _, _) = start_manager(config);
    assert!(manager.sync_commit());

    let mut backend = manager.backend_logger().unwrap();
    for txn in 1..=3u64 {
        backend.begin(txn).unwrap();
        backend
            .insert(txn, ORDERS, Location::new(0, txn as u32), &row(txn))
            .unwrap();
        backend.commit(txn, txn).unwrap();
        assert!(manager.persistent_flushed_commit_id() >= txn);
    }
    drop(backend);
    manager.terminate().unwrap();

    let (store, _) = recover_dir(dir.path());
    assert_eq!(store.live_tuples(ORDERS).len(), 3);
}

#[test]
fn test_async_commit_becomes_durable_later() {
    let dir = tempdir().unwrap();
    let (manager, _, _) = start_manager(test_config(dir.path()));
    assert!(!manager.sync_commit());

    let mut backend = manager.backend_logger().unwrap();
    backend.begin(1).unwrap();
    backend.commit(1, 1).unwrap();

    assert!(manager
        .wait_for_durable(1, Some(Duration::from_secs(5)))
        .unwrap());
    assert!(!manager
        .wait_for_durable(99, Some(Duration::from_millis(20)))
        .unwrap());

    manager.set_sync_commit(true);
    assert!(manager.sync_commit());
    backend.begin(2).unwrap();
    backend.commit(2, 2).unwrap();
    assert_eq!(manager.persistent_flushed_commit_id(), 2);

    drop(backend);
    manager.terminate().unwrap();
}

#[test]
fn test_backends_on_worker_threads() {
    let dir = tempdir().unwrap();
    let (manager, _, _) = start_manager(test_config(dir.path()));
    let manager = Arc::new(manager);

    let workers: Vec<_> = (0..3u32)
        .map(|worker| {
            let mut backend = manager.backend_logger().unwrap();
            thread::spawn(move || {
                for slot in 0..20u32 {
                    let id = u64::from(worker * 100 + slot + 1);
                    backend.begin(id).unwrap();
                    backend
                        .insert(id, ITEMS, Location::new(worker, slot), &row(id))
                        .unwrap();
                    // Commit ids only need to be unique per test here
                    backend.commit(id, id).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    manager.terminate().unwrap();
    assert_eq!(manager.status(), LoggingStatus::Sleep);
    assert_eq!(manager.pool_size(), 0);

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.committed_txns, 60);
    assert_eq!(store.live_tuples(ITEMS).len(), 60);
}

#[test]
fn test_fsync_failure_degrades_manager() {
    let syncs_left = Arc::new(AtomicUsize::new(1));
    let sink = FailingSink {
        syncs_left: Arc::clone(&syncs_left),
        bytes: 0,
    };
    let config = WalConfig {
        sync_commit: true,
        flush_interval_ms: 5,
        ..WalConfig::default()
    };
    let manager = LogManager::with_sink(config, Box::new(sink));
    manager.standby_logging().unwrap();
    manager.start_recovery(&mut MemoryStore::new()).unwrap();
    manager.start_logging().unwrap();

    let mut backend = manager.backend_logger().unwrap();
    backend.begin(1).unwrap();
    backend.commit(1, 1).unwrap();
    assert_eq!(manager.persistent_flushed_commit_id(), 1);

    // The next fsync fails; the waiting commit must not report success
    backend.begin(2).unwrap();
    let err = backend.commit(2, 2).unwrap_err();
    assert!(matches!(err, WalError::Degraded(_)));

    assert_eq!(manager.persistent_flushed_commit_id(), 1);
    assert_eq!(manager.status(), LoggingStatus::Degraded);
    assert!(matches!(
        manager.backend_logger(),
        Err(WalError::Degraded(_))
    ));

    drop(backend);
    assert!(matches!(manager.terminate(), Err(WalError::Io(_))));
    assert_eq!(manager.status(), LoggingStatus::Degraded);
}

#[test]
fn test_none_backend_advances_without_files() {
    let dir = tempdir().unwrap();
    let config = WalConfig {
        backend: LoggingBackend::None,
        ..test_config(dir.path())
    };
    let (manager, _, stats) = start_manager(config);
    assert_eq!(stats.files_scanned, 0);

    let mut backend = manager.backend_logger().unwrap();
    backend.begin(1).unwrap();
    backend.commit(1, 4).unwrap();
    assert!(manager
        .wait_for_durable(4, Some(Duration::from_secs(5)))
        .unwrap());

    drop(backend);
    manager.terminate().unwrap();
    assert!(list_log_files(dir.path()).unwrap().is_empty());
}

#[test]
fn test_standby_fails_on_unusable_log_dir() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let manager = LogManager::new(WalConfig::with_log_dir(&blocker));
    let err = manager.standby_logging().unwrap_err();
    assert!(matches!(err, WalError::Io(_)));
    assert_eq!(manager.status(), LoggingStatus::Degraded);
}
