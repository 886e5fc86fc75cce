//! In-memory table store
//!
//! Reference `RecoveryStorage` implementation: tables of segments of slots,
//! segments created on demand, plus a content index rebuilt after recovery.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::StorageError;
use crate::traits::{RecoveryStorage, TupleSlot};
use crate::wal::{Location, TableId};

/// One tuple slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTuple {
    pub data: Vec<u8>,
    /// Visible (not deactivated)
    pub active: bool,
    /// Made permanent by `commit_recovered`
    pub committed: bool,
}

type Segment = BTreeMap<u32, StoredTuple>;

#[derive(Debug, Default)]
struct Table {
    segments: BTreeMap<u32, Segment>,
}

/// Tables held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<TableId, Table>,

    /// Slot images overwritten during replay, newest last
    before_images: HashMap<TupleSlot, Vec<StoredTuple>>,

    /// Tuple bytes to locations, over committed live tuples
    index: HashMap<(TableId, Vec<u8>), Vec<Location>>,

    index_rebuilds: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot contents, whatever their state
    #[must_use]
    pub fn tuple(&self, table: TableId, location: Location) -> Option<&StoredTuple> {
        self.tables
            .get(&table)?
            .segments
            .get(&location.segment_id)?
            .get(&location.slot_id)
    }

    /// Committed, active tuples of `table` in location order
    #[must_use]
    pub fn live_tuples(&self, table: TableId) -> Vec<(Location, Vec<u8>)> {
        let Some(table) = self.tables.get(&table) else {
            return Vec::new();
        };

        table
            .segments
            .iter()
            .flat_map(|(&segment_id, slots)| {
                slots
                    .iter()
                    .filter(|(_, tuple)| tuple.active && tuple.committed)
                    .map(move |(&slot_id, tuple)| {
                        (Location::new(segment_id, slot_id), tuple.data.clone())
                    })
            })
            .collect()
    }

    /// Tables that hold at least one slot
    #[must_use]
    pub fn tables(&self) -> Vec<TableId> {
        self.tables
            .iter()
            .filter(|(_, t)| t.segments.values().any(|s| !s.is_empty()))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Total slots across all tables, live or not
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.segments.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Locations whose tuple bytes equal `data`
    #[must_use]
    pub fn lookup(&self, table: TableId, data: &[u8]) -> &[Location] {
        self.index
            .get(&(table, data.to_vec()))
            .map_or(&[], Vec::as_slice)
    }

    /// How many times the index has been rebuilt
    #[must_use]
    pub fn index_rebuilds(&self) -> usize {
        self.index_rebuilds
    }

    fn slot_mut(&mut self, table: TableId, location: Location) -> Option<&mut StoredTuple> {
        self.tables
            .get_mut(&table)?
            .segments
            .get_mut(&location.segment_id)?
            .get_mut(&location.slot_id)
    }

    fn remove_slot(&mut self, table: TableId, location: Location) -> Option<StoredTuple> {
        self.tables
            .get_mut(&table)?
            .segments
            .get_mut(&location.segment_id)?
            .remove(&location.slot_id)
    }
}

impl RecoveryStorage for MemoryStore {
    fn apply_insert(
        &mut self,
        table: TableId,
        location: Location,
        tuple: &[u8],
    ) -> Result<Location, StorageError> {
        let segments = &mut self.tables.entry(table).or_default().segments;
        let segment = segments.entry(location.segment_id).or_insert_with(|| {
            debug!(%table, segment_id = location.segment_id, "Creating segment during replay");
            Segment::new()
        });

        let previous = segment.insert(
            location.slot_id,
            StoredTuple {
                data: tuple.to_vec(),
                active: true,
                committed: false,
            },
        );
        if let Some(previous) = previous {
            self.before_images
                .entry((table, location))
                .or_default()
                .push(previous);
        }
        Ok(location)
    }

    fn deactivate(&mut self, table: TableId, location: Location) -> Result<(), StorageError> {
        match self.slot_mut(table, location) {
            Some(tuple) => {
                tuple.active = false;
                Ok(())
            }
            None => Err(StorageError::MissingSlot {
                table: table.to_string(),
                location: location.to_string(),
            }),
        }
    }

    fn undo_insert(&mut self, table: TableId, location: Location) -> Result<(), StorageError> {
        let key = (table, location);
        let restored = self.before_images.get_mut(&key).and_then(Vec::pop);
        if self.before_images.get(&key).is_some_and(Vec::is_empty) {
            self.before_images.remove(&key);
        }

        match restored {
            Some(image) => match self.slot_mut(table, location) {
                Some(slot) => *slot = image,
                None => {
                    return Err(StorageError::MissingSlot {
                        table: table.to_string(),
                        location: location.to_string(),
                    })
                }
            },
            None => {
                self.remove_slot(table, location);
            }
        }
        Ok(())
    }

    fn undo_delete(&mut self, table: TableId, location: Location) -> Result<(), StorageError> {
        if let Some(tuple) = self.slot_mut(table, location) {
            tuple.active = true;
        }
        Ok(())
    }

    fn commit_recovered(
        &mut self,
        inserted: &BTreeSet<TupleSlot>,
        deleted: &BTreeSet<TupleSlot>,
    ) -> Result<(), StorageError> {
        self.before_images.clear();
        for &(table, location) in inserted {
            if let Some(tuple) = self.slot_mut(table, location) {
                tuple.committed = true;
            }
        }
        for &(table, location) in deleted {
            self.remove_slot(table, location);
        }

        // Anything still provisional belonged to no committed transaction
        for table in self.tables.values_mut() {
            for segment in table.segments.values_mut() {
                segment.retain(|_, tuple| tuple.committed);
            }
        }
        Ok(())
    }

    fn rebuild_indexes(&mut self) -> Result<(), StorageError> {
        self.index.clear();
        for (&table_id, table) in &self.tables {
            for (&segment_id, slots) in &table.segments {
                for (&slot_id, tuple) in slots {
                    if tuple.active && tuple.committed {
                        self.index
                            .entry((table_id, tuple.data.clone()))
                            .or_default()
                            .push(Location::new(segment_id, slot_id));
                    }
                }
            }
        }
        self.index_rebuilds += 1;
        Ok(())
    }
}
