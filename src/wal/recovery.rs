//! Log replay after a crash
//!
//! Implements the redo/undo pass:
//! - Scan every log file oldest first, stopping each file at its first torn frame
//! - After a torn frame, skip files until the next writer session starts
//! - Apply tuple records provisionally, tracked per transaction
//! - Keep committed effects, undo aborted and unfinished ones
//! - Hand the surviving effects to storage in one final commit

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::files::list_log_files;
use super::reader::{LogReader, ReadOutcome};
use super::record::{CommitId, Location, LogRecord, LogRecordKind, TableId, TxnId};
use crate::error::{WalError, WalResult};
use crate::traits::{RecoveryStorage, TupleSlot};

/// Summary of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// Log files opened
    pub files_scanned: usize,

    /// Complete frames replayed
    pub records_replayed: u64,

    /// Bytes covered by complete frames
    pub bytes_replayed: u64,

    /// Transactions whose effects were kept
    pub committed_txns: u64,

    /// Transactions rolled back by an abort record
    pub aborted_txns: u64,

    /// Transactions rolled back because they never finished
    pub incomplete_txns: u64,

    /// Files that ended in a partial or corrupt frame
    pub torn_files: usize,

    /// Files skipped because they continue a session whose log was torn
    pub skipped_files: usize,

    /// Highest commit id found committed (the initial frontier)
    pub max_commit_id: CommitId,

    /// Highest transaction id seen; new ids must start above it
    pub max_txn_id: TxnId,

    /// Frontier recorded by the last delimiter
    pub last_delimiter: Option<CommitId>,
}

#[derive(Debug, Clone, Copy)]
enum Effect {
    Inserted(TupleSlot),
    Deleted(TupleSlot),
}

/// Replay state for one pass
struct Replay<'a> {
    storage: &'a mut dyn RecoveryStorage,

    /// Provisional effects of transactions not yet finished, tagged with apply sequence
    txns: HashMap<TxnId, Vec<(u64, Effect)>>,

    /// Apply sequence across all transactions
    sequence: u64,

    /// Net effects of committed transactions
    inserted: BTreeSet<TupleSlot>,
    deleted: BTreeSet<TupleSlot>,

    stats: RecoveryStats,
}

impl<'a> Replay<'a> {
    fn new(storage: &'a mut dyn RecoveryStorage) -> Self {
        Self {
            storage,
            txns: HashMap::new(),
            sequence: 0,
            inserted: BTreeSet::new(),
            deleted: BTreeSet::new(),
            stats: RecoveryStats::default(),
        }
    }

    fn apply(&mut self, record: LogRecord) -> WalResult<()> {
        let header = &record.header;
        let txn_id = header.txn_id;
        self.stats.max_txn_id = self.stats.max_txn_id.max(txn_id);

        match record.kind {
            LogRecordKind::TxnBegin => {
                if self.txns.insert(txn_id, Vec::new()).is_some() {
                    return Err(WalError::protocol(txn_id, "begin for a transaction already open"));
                }
            }
            LogRecordKind::TxnCommit => {
                let effects = self
                    .txns
                    .remove(&txn_id)
                    .ok_or_else(|| WalError::protocol(txn_id, "commit without begin"))?;
                self.merge(effects);
                self.stats.committed_txns += 1;
                self.stats.max_commit_id = self.stats.max_commit_id.max(header.commit_id);
            }
            LogRecordKind::TxnAbort => {
                let effects = self
                    .txns
                    .remove(&txn_id)
                    .ok_or_else(|| WalError::protocol(txn_id, "abort without begin"))?;
                self.undo(effects)?;
                self.stats.aborted_txns += 1;
            }
            LogRecordKind::TxnDelimiter => {
                self.stats.last_delimiter = Some(header.commit_id);
                if header.session_start {
                    let rolled_back = self.undo_open()?;
                    if rolled_back > 0 {
                        debug!(rolled_back, "Rolled back transactions of a crashed session");
                    }
                }
            }
            LogRecordKind::TupleInsert => {
                let location = required(txn_id, header.insert_location, "insert")?;
                let table = header.table;
                self.open_txn(txn_id)?;
                let at = self.storage.apply_insert(table, location, &record.payload)?;
                self.record(txn_id, Effect::Inserted((table, at)));
            }
            LogRecordKind::TupleUpdate => {
                let old = required(txn_id, header.delete_location, "update")?;
                let new = required(txn_id, header.insert_location, "update")?;
                let table = header.table;
                self.open_txn(txn_id)?;
                self.storage.deactivate(table, old)?;
                self.record(txn_id, Effect::Deleted((table, old)));
                let at = self.storage.apply_insert(table, new, &record.payload)?;
                self.record(txn_id, Effect::Inserted((table, at)));
            }
            LogRecordKind::TupleDelete => {
                let location = required(txn_id, header.delete_location, "delete")?;
                let table = header.table;
                self.open_txn(txn_id)?;
                self.storage.apply_delete(table, location)?;
                self.record(txn_id, Effect::Deleted((table, location)));
            }
        }
        Ok(())
    }

    fn open_txn(&mut self, txn_id: TxnId) -> WalResult<&mut Vec<(u64, Effect)>> {
        self.txns
            .get_mut(&txn_id)
            .ok_or_else(|| WalError::protocol(txn_id, "tuple record without begin"))
    }

    fn record(&mut self, txn_id: TxnId, effect: Effect) {
        self.sequence += 1;
        if let Some(effects) = self.txns.get_mut(&txn_id) {
            effects.push((self.sequence, effect));
        }
    }

    /// Fold a committed transaction into the net effect sets
    fn merge(&mut self, effects: Vec<(u64, Effect)>) {
        for (_, effect) in effects {
            match effect {
                Effect::Inserted(slot) => {
                    self.deleted.remove(&slot);
                    self.inserted.insert(slot);
                }
                Effect::Deleted(slot) => {
                    self.inserted.remove(&slot);
                    self.deleted.insert(slot);
                }
            }
        }
    }

    /// Reverse provisional effects, newest first
    fn undo(&mut self, mut effects: Vec<(u64, Effect)>) -> WalResult<()> {
        effects.sort_unstable_by_key(|(sequence, _)| std::cmp::Reverse(*sequence));
        for (_, effect) in effects {
            match effect {
                Effect::Inserted((table, location)) => self.storage.undo_insert(table, location)?,
                Effect::Deleted((table, location)) => self.storage.undo_delete(table, location)?,
            }
        }
        Ok(())
    }

    /// Roll back every open transaction, newest effect first
    fn undo_open(&mut self) -> WalResult<u64> {
        let count = self.txns.len() as u64;
        let effects: Vec<_> = self.txns.drain().flat_map(|(_, effects)| effects).collect();
        self.undo(effects)?;
        self.stats.incomplete_txns += count;
        Ok(count)
    }

    fn finish(mut self) -> WalResult<RecoveryStats> {
        self.undo_open()?;
        self.storage.commit_recovered(&self.inserted, &self.deleted)?;
        self.storage.rebuild_indexes()?;
        Ok(self.stats)
    }
}

fn required(txn_id: TxnId, location: Option<Location>, what: &str) -> WalResult<Location> {
    location.ok_or_else(|| WalError::protocol(txn_id, format!("{what} record without location")))
}

/// Replays the log files of one directory
pub struct LogRecovery {
    log_dir: PathBuf,
}

impl LogRecovery {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Replay every log file into `storage`
    ///
    /// Torn or corrupt frames end the file they are in. Files rotated later
    /// in the same writer session are skipped, since a commit there may
    /// finish a transaction whose tuple records were lost with the tear.
    /// Replay resumes at the first file that opens with a session-start
    /// delimiter; that session recovered from the same prefix.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the log contradicts itself (nothing
    /// should be trusted then), `Io` for read failures, and `Storage` if the
    /// storage layer rejects a step.
    pub fn run(&self, storage: &mut dyn RecoveryStorage) -> WalResult<RecoveryStats> {
        let mut replay = Replay::new(storage);
        let mut torn_session = false;

        for (number, path) in list_log_files(&self.log_dir)? {
            let file = File::open(&path)?;
            let file_len = file.metadata()?.len();
            let mut reader = LogReader::new(BufReader::new(file), file_len);
            replay.stats.files_scanned += 1;

            let mut first_frame = true;
            let mut skipped = false;
            loop {
                match reader.next_frame()? {
                    ReadOutcome::Record(record) => {
                        if torn_session {
                            if first_frame && record.is_session_start() {
                                torn_session = false;
                            } else {
                                warn!(file = number, "Log file continues a torn session, skipping");
                                replay.stats.skipped_files += 1;
                                skipped = true;
                                break;
                            }
                        }
                        first_frame = false;
                        replay.stats.records_replayed += 1;
                        replay.apply(record)?;
                    }
                    ReadOutcome::End => break,
                    ReadOutcome::Torn { offset, error } => {
                        warn!(
                            file = number,
                            offset,
                            discarded_bytes = file_len - offset,
                            %error,
                            "Torn log frame, ignoring rest of file"
                        );
                        replay.stats.torn_files += 1;
                        torn_session = true;
                        break;
                    }
                }
            }
            if !skipped {
                replay.stats.bytes_replayed += reader.offset();
            }
        }

        let stats = replay.finish()?;
        info!(
            files = stats.files_scanned,
            records = stats.records_replayed,
            committed = stats.committed_txns,
            aborted = stats.aborted_txns,
            incomplete = stats.incomplete_txns,
            torn_files = stats.torn_files,
            skipped_files = stats.skipped_files,
            max_commit_id = stats.max_commit_id,
            "Recovery complete"
        );
        Ok(stats)
    }

    /// Replay records already in memory, as if they were one log file
    ///
    /// # Errors
    ///
    /// Same as [`LogRecovery::run`], minus IO.
    pub fn replay_records(
        storage: &mut dyn RecoveryStorage,
        records: impl IntoIterator<Item = LogRecord>,
    ) -> WalResult<RecoveryStats> {
        let mut replay = Replay::new(storage);
        for record in records {
            replay.stats.records_replayed += 1;
            replay.stats.bytes_replayed += record.encoded_len() as u64;
            replay.apply(record)?;
        }
        replay.finish()
    }
}
