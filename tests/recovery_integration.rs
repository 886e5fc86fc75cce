//! Crash recovery over real log directories

mod common;

use common::*;
use wal_core::wal::list_log_files;
use wal_core::{Location, LogRecord, LogManager, LoggingStatus, MemoryStore, WalError};

#[test]
fn test_aborted_transaction_discarded() {
    let dir = tempdir().unwrap();
    let (manager, _, _) = start_manager(test_config(dir.path()));
    let mut backend = manager.backend_logger().unwrap();

    backend.begin(1).unwrap();
    backend.insert(1, ORDERS, Location::new(0, 0), &row(1)).unwrap();
    backend.commit(1, 1).unwrap();

    backend.begin(2).unwrap();
    backend.insert(2, ORDERS, Location::new(0, 1), &row(2)).unwrap();
    backend.abort(2).unwrap();
    drop(backend);
    manager.terminate().unwrap();

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.committed_txns, 1);
    assert_eq!(stats.aborted_txns, 1);
    assert_eq!(store.live_tuples(ORDERS), vec![(Location::new(0, 0), row(1))]);
    assert_eq!(store.slot_count(), 1);
}

#[test]
fn test_truncated_tail_keeps_complete_transactions() {
    let dir = tempdir().unwrap();
    let path = write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
            LogRecord::commit(1, 1),
            LogRecord::begin(2),
            LogRecord::insert(2, ORDERS, Location::new(0, 1), row(2)),
            LogRecord::commit(2, 2),
        ],
    );
    // Tear the final commit frame
    CorruptionInjector::new(&path).truncate_by(3);

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.torn_files, 1);
    assert_eq!(stats.committed_txns, 1);
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(stats.max_commit_id, 1);
    assert_eq!(store.live_tuples(ORDERS), vec![(Location::new(0, 0), row(1))]);
}

#[test]
fn test_garbage_tail_is_ignored() {
    let dir = tempdir().unwrap();
    let path = write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
            LogRecord::commit(1, 1),
        ],
    );
    let injector = CorruptionInjector::new(&path);
    let clean_len = injector.len();
    injector.append_garbage(&[0xff; 32]);

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.torn_files, 1);
    assert_eq!(stats.bytes_replayed, clean_len);
    assert_eq!(store.live_tuples(ORDERS).len(), 1);
}

#[test]
fn test_corrupt_file_does_not_hide_later_files() {
    let dir = tempdir().unwrap();
    let first = write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
            LogRecord::commit(1, 1),
        ],
    );
    write_log_file(
        dir.path(),
        2,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(2),
            LogRecord::insert(2, ORDERS, Location::new(0, 1), row(2)),
            LogRecord::commit(2, 2),
        ],
    );

    // Damage the payload of the first file's insert
    let session_len = LogRecord::session_start(0).encoded_len() as u64;
    let begin_len = LogRecord::begin(1).encoded_len() as u64;
    CorruptionInjector::new(&first).flip_bit(session_len + begin_len + 52, 2);

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.files_scanned, 2);
    assert_eq!(stats.torn_files, 1);
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(store.live_tuples(ORDERS), vec![(Location::new(0, 1), row(2))]);
}

#[test]
fn test_tear_skips_rotated_files_of_same_session() {
    let dir = tempdir().unwrap();
    let first = write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
            LogRecord::insert(1, ORDERS, Location::new(0, 1), row(2)),
        ],
    );
    // Rotated mid-transaction: no session start, commits the torn transaction
    write_log_file(dir.path(), 2, &[LogRecord::commit(1, 1)]);

    // Damage the payload of the second insert
    let prefix_len = [
        LogRecord::session_start(0),
        LogRecord::begin(1),
        LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
    ]
    .iter()
    .map(|record| record.encoded_len() as u64)
    .sum::<u64>();
    CorruptionInjector::new(&first).flip_bit(prefix_len + 52, 0);

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.torn_files, 1);
    assert_eq!(stats.skipped_files, 1);
    assert_eq!(stats.committed_txns, 0);
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(stats.max_commit_id, 0);
    assert_eq!(store.slot_count(), 0);

    // A later session resumes replay
    write_log_file(
        dir.path(),
        3,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(2),
            LogRecord::insert(2, ORDERS, Location::new(0, 2), row(3)),
            LogRecord::commit(2, 2),
        ],
    );

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.files_scanned, 3);
    assert_eq!(stats.skipped_files, 1);
    assert_eq!(stats.committed_txns, 1);
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(stats.max_commit_id, 2);
    assert_eq!(store.live_tuples(ORDERS), vec![(Location::new(0, 2), row(3))]);
}

#[test]
fn test_commit_without_begin_aborts_recovery() {
    let dir = tempdir().unwrap();
    write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), row(1)),
            LogRecord::commit(1, 1),
            LogRecord::commit(7, 2),
        ],
    );

    let manager = LogManager::new(test_config(dir.path()));
    manager.standby_logging().unwrap();
    let err = manager.start_recovery(&mut MemoryStore::new()).unwrap_err();

    assert!(matches!(err, WalError::ProtocolViolation { txn_id: 7, .. }));
    assert_eq!(manager.status(), LoggingStatus::Degraded);
    assert!(matches!(manager.start_logging(), Err(WalError::Degraded(_))));
    assert!(manager.backend_logger().is_err());
}

#[test]
fn test_replay_is_idempotent() {
    let dir = tempdir().unwrap();
    let (manager, _, _) = start_manager(test_config(dir.path()));
    let mut backend = manager.backend_logger().unwrap();
    for txn in 1..=20u64 {
        backend.begin(txn).unwrap();
        backend
            .insert(txn, ORDERS, Location::new(0, txn as u32), &row(txn))
            .unwrap();
        if txn % 3 == 0 {
            backend.delete(txn, ORDERS, Location::new(0, txn as u32 - 1)).unwrap();
        }
        backend.commit(txn, txn).unwrap();
    }
    drop(backend);
    manager.terminate().unwrap();

    let (first, first_stats) = recover_dir(dir.path());
    let (second, second_stats) = recover_dir(dir.path());

    assert_eq!(first_stats, second_stats);
    assert_eq!(first.live_tuples(ORDERS), second.live_tuples(ORDERS));
    assert_eq!(first.live_tuples(ORDERS).len(), 20 - 6);
}

#[test]
fn test_rotation_and_multi_file_recovery() {
    let dir = tempdir().unwrap();
    let config = wal_core::WalConfig {
        rotation_size: 512,
        ..test_config(dir.path())
    };
    let (manager, _, _) = start_manager(config);
    let mut backend = manager.backend_logger().unwrap();

    for txn in 1..=100u64 {
        backend.begin(txn).unwrap();
        backend
            .insert(txn, ORDERS, Location::new(txn as u32 / 10, txn as u32 % 10), &row(txn))
            .unwrap();
        backend.commit(txn, txn).unwrap();
        if txn % 10 == 0 {
            assert!(manager
                .wait_for_durable(txn, Some(std::time::Duration::from_secs(5)))
                .unwrap());
        }
    }
    drop(backend);
    manager.terminate().unwrap();
    assert_eq!(manager.persistent_flushed_commit_id(), 100);

    let files = list_log_files(dir.path()).unwrap();
    assert!(files.len() > 1, "expected rotation, got {} file(s)", files.len());

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.files_scanned, files.len());
    assert_eq!(stats.committed_txns, 100);
    assert_eq!(stats.max_commit_id, 100);
    assert_eq!(store.live_tuples(ORDERS).len(), 100);
}

#[test]
fn test_restart_continues_after_recovered_frontier() {
    let dir = tempdir().unwrap();

    {
        let (manager, _, _) = start_manager(test_config(dir.path()));
        let mut backend = manager.backend_logger().unwrap();
        backend.begin(1).unwrap();
        backend.insert(1, ORDERS, Location::new(0, 0), &row(1)).unwrap();
        backend.commit(1, 5).unwrap();
        drop(backend);
        manager.terminate().unwrap();
    }

    let (manager, store, stats) = start_manager(test_config(dir.path()));
    assert_eq!(stats.max_commit_id, 5);
    assert_eq!(stats.max_txn_id, 1);
    assert_eq!(manager.persistent_flushed_commit_id(), 5);
    assert_eq!(store.live_tuples(ORDERS).len(), 1);

    let mut backend = manager.backend_logger().unwrap();
    backend.begin(2).unwrap();
    backend.insert(2, ORDERS, Location::new(0, 1), &row(2)).unwrap();
    backend.commit(2, 6).unwrap();
    drop(backend);
    manager.terminate().unwrap();

    assert_eq!(list_log_files(dir.path()).unwrap().len(), 2);
    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.max_commit_id, 6);
    assert_eq!(store.live_tuples(ORDERS).len(), 2);
}

#[test]
fn test_crashed_session_rolled_back_before_slot_reuse() {
    let dir = tempdir().unwrap();
    // A session that crashed mid-transaction
    write_log_file(
        dir.path(),
        1,
        &[
            LogRecord::session_start(0),
            LogRecord::begin(1),
            LogRecord::insert(1, ORDERS, Location::new(0, 0), b"lost".to_vec()),
        ],
    );

    let (manager, store, stats) = start_manager(test_config(dir.path()));
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(store.slot_count(), 0);

    // The next session reuses the slot
    let mut backend = manager.backend_logger().unwrap();
    backend.begin(2).unwrap();
    backend
        .insert(2, ORDERS, Location::new(0, 0), b"kept")
        .unwrap();
    backend.commit(2, 2).unwrap();
    drop(backend);
    manager.terminate().unwrap();

    let (store, stats) = recover_dir(dir.path());
    assert_eq!(stats.incomplete_txns, 1);
    assert_eq!(stats.committed_txns, 1);
    assert_eq!(
        store.live_tuples(ORDERS),
        vec![(Location::new(0, 0), b"kept".to_vec())]
    );
}
