//! Storage layer contract used during recovery replay
//!
//! The log never interprets tuple bytes or locations. It only asks the
//! storage layer to redo and undo effects at opaque `(segment, slot)`
//! handles, then to make the surviving effects permanent.

use std::collections::BTreeSet;

use crate::error::StorageError;
use crate::wal::{Location, TableId};

/// A tuple position qualified by its table
pub type TupleSlot = (TableId, Location);

/// Redo/undo primitives the recovery procedure drives
pub trait RecoveryStorage {
    /// Materialize `tuple` at `location`, creating the segment if needed
    ///
    /// Returns where the tuple actually landed.
    fn apply_insert(
        &mut self,
        table: TableId,
        location: Location,
        tuple: &[u8],
    ) -> Result<Location, StorageError>;

    /// Logically delete the tuple at `location`
    fn apply_delete(&mut self, table: TableId, location: Location) -> Result<(), StorageError> {
        self.deactivate(table, location)
    }

    /// Hide the tuple at `location` without removing it
    fn deactivate(&mut self, table: TableId, location: Location) -> Result<(), StorageError>;

    /// Reverse an insert applied during replay
    ///
    /// If the insert overwrote an occupied slot (an in-place update), the
    /// previous image must come back; otherwise the slot is freed. Undo runs
    /// newest first, so overwrites of one slot unwind in stack order.
    fn undo_insert(&mut self, table: TableId, location: Location) -> Result<(), StorageError>;

    /// Reverse a delete or deactivate applied during replay
    fn undo_delete(&mut self, table: TableId, location: Location) -> Result<(), StorageError>;

    /// Make the union of all committed effects permanent, exactly once
    fn commit_recovered(
        &mut self,
        inserted: &BTreeSet<TupleSlot>,
        deleted: &BTreeSet<TupleSlot>,
    ) -> Result<(), StorageError>;

    /// Rebuild secondary indexes from the recovered base tables
    fn rebuild_indexes(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
