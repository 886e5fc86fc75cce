//! Transfer buffer: the unit moved from a backend to the frontend

use super::record::{CommitId, LogRecord, LogRecordKind};

/// Byte buffer of serialized records with a soft capacity
///
/// Owned by exactly one thread at a time: filled by a backend, moved through
/// the pool, drained and written by the frontend.
#[derive(Debug)]
pub struct TransferBuffer {
    /// Identifier of the backend that filled this buffer
    backend_id: u64,

    /// Encoded frames, in append order
    data: Vec<u8>,

    /// Soft capacity in bytes
    capacity: usize,

    /// Highest commit id among the commit records in `data`
    max_commit_id: Option<CommitId>,

    /// Number of frames in `data`
    record_count: usize,
}

impl TransferBuffer {
    /// Create empty buffer
    #[must_use]
    pub fn new(backend_id: u64, capacity: usize) -> Self {
        Self {
            backend_id,
            data: Vec::with_capacity(capacity),
            capacity,
            max_commit_id: None,
            record_count: 0,
        }
    }

    /// True if `record` fits without exceeding capacity
    ///
    /// An empty buffer accepts any record, however large.
    #[must_use]
    pub fn has_room_for(&self, record: &LogRecord) -> bool {
        self.data.is_empty() || self.data.len() + record.encoded_len() <= self.capacity
    }

    /// Serialize and append a record
    pub fn append(&mut self, record: &LogRecord) {
        record.encode_into(&mut self.data);
        self.record_count += 1;
        if record.kind == LogRecordKind::TxnCommit {
            let commit_id = record.header.commit_id;
            self.max_commit_id = Some(self.max_commit_id.map_or(commit_id, |m| m.max(commit_id)));
        }
    }

    #[must_use]
    pub fn backend_id(&self) -> u64 {
        self.backend_id
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn max_commit_id(&self) -> Option<CommitId> {
        self.max_commit_id
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::{Location, TableId};

    #[test]
    fn test_append_tracks_commits() {
        let mut buffer = TransferBuffer::new(1, 4096);
        buffer.append(&LogRecord::begin(10));
        buffer.append(&LogRecord::commit(10, 4));
        buffer.append(&LogRecord::begin(11));
        buffer.append(&LogRecord::commit(11, 6));

        assert_eq!(buffer.record_count(), 4);
        assert_eq!(buffer.max_commit_id(), Some(6));
        assert_eq!(buffer.backend_id(), 1);
    }

    #[test]
    fn test_empty_buffer_accepts_oversized_record() {
        let big = LogRecord::insert(1, TableId::new(0, 0), Location::new(0, 0), vec![7u8; 1000]);
        let mut buffer = TransferBuffer::new(1, 64);

        assert!(buffer.has_room_for(&big));
        buffer.append(&big);
        assert!(buffer.len() > buffer.capacity());
        assert!(!buffer.has_room_for(&LogRecord::begin(2)));
    }
}
