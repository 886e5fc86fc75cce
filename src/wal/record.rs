//! Log record definitions and frame serialization
//!
//! Every durable fact is written as one self-describing frame:
//!
//! ```text
//! kind:u8 | len:u32 | txn_id:u64 | commit_id:u64 | database_id:u32 | table_id:u32 |
//! flags:u8 | insert(segment:u32, slot:u32) | delete(segment:u32, slot:u32) |
//! payload_len:u32 | payload | crc32:u32
//! ```
//!
//! `len` counts every byte after the length field itself. It is reserved
//! while the frame is written and patched once the body size is known, so a
//! reader can check the frame fits in the file before parsing any of it.
//! All integers are big-endian.

use std::fmt;

use serde::Serialize;

use crate::error::FramingError;

/// Transaction identifier, never reused
pub type TxnId = u64;

/// Commit identifier, assigned at commit time and strictly increasing
pub type CommitId = u64;

/// CRC32 algorithm for frames
pub(crate) const CRC_ALGORITHM: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Kind tag plus length field
pub const FRAME_PREFIX_SIZE: usize = 5;

/// Fixed header bytes after the length field (excluding payload and CRC)
pub const HEADER_SIZE: usize = 45;

/// Trailing checksum
pub const CRC_SIZE: usize = 4;

/// Smallest legal value of the length field
pub const MIN_BODY_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Largest legal value of the length field
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Largest tuple image a single frame can carry
pub const MAX_PAYLOAD_SIZE: usize = MAX_BODY_SIZE - MIN_BODY_SIZE;

const FLAG_INSERT_LOCATION: u8 = 0x01;
const FLAG_DELETE_LOCATION: u8 = 0x02;
const FLAG_SESSION_START: u8 = 0x04;
const KNOWN_FLAGS: u8 = FLAG_INSERT_LOCATION | FLAG_DELETE_LOCATION | FLAG_SESSION_START;

/// Opaque `(segment, slot)` handle naming where a tuple lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Location {
    pub segment_id: u32,
    pub slot_id: u32,
}

impl Location {
    #[must_use]
    pub const fn new(segment_id: u32, slot_id: u32) -> Self {
        Self {
            segment_id,
            slot_id,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.segment_id, self.slot_id)
    }
}

/// Database and table a tuple record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct TableId {
    pub database_id: u32,
    pub table_id: u32,
}

impl TableId {
    #[must_use]
    pub const fn new(database_id: u32, table_id: u32) -> Self {
        Self {
            database_id,
            table_id,
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database_id, self.table_id)
    }
}

/// Record kind tag (first byte of every frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum LogRecordKind {
    TxnBegin = 1,
    TxnCommit = 2,
    TxnAbort = 3,
    /// Durability marker written by the frontend after each flush
    TxnDelimiter = 4,
    TupleInsert = 5,
    TupleUpdate = 6,
    TupleDelete = 7,
}

impl LogRecordKind {
    /// Decode a kind tag
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::TxnBegin),
            2 => Some(Self::TxnCommit),
            3 => Some(Self::TxnAbort),
            4 => Some(Self::TxnDelimiter),
            5 => Some(Self::TupleInsert),
            6 => Some(Self::TupleUpdate),
            7 => Some(Self::TupleDelete),
            _ => None,
        }
    }

    /// Encoded tag
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for insert, update and delete records
    #[must_use]
    pub fn is_tuple(self) -> bool {
        matches!(
            self,
            Self::TupleInsert | Self::TupleUpdate | Self::TupleDelete
        )
    }
}

/// Fixed header present on every record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RecordHeader {
    /// Owning transaction (0 for delimiters)
    pub txn_id: TxnId,

    /// Commit id (commit records) or durable frontier (delimiters), else 0
    pub commit_id: CommitId,

    /// Target table, only meaningful for tuple records
    pub table: TableId,

    /// Where the new tuple image lives (insert, update)
    pub insert_location: Option<Location>,

    /// Where the old tuple image lived (update, delete)
    pub delete_location: Option<Location>,

    /// Delimiter opening a new writer session
    pub session_start: bool,
}

/// One durable fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub kind: LogRecordKind,
    pub header: RecordHeader,
    /// Serialized post-image tuple; empty for everything but insert/update
    pub payload: Vec<u8>,
}

impl LogRecord {
    fn txn(kind: LogRecordKind, txn_id: TxnId, commit_id: CommitId) -> Self {
        Self {
            kind,
            header: RecordHeader {
                txn_id,
                commit_id,
                ..RecordHeader::default()
            },
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn begin(txn_id: TxnId) -> Self {
        Self::txn(LogRecordKind::TxnBegin, txn_id, 0)
    }

    #[must_use]
    pub fn commit(txn_id: TxnId, commit_id: CommitId) -> Self {
        Self::txn(LogRecordKind::TxnCommit, txn_id, commit_id)
    }

    #[must_use]
    pub fn abort(txn_id: TxnId) -> Self {
        Self::txn(LogRecordKind::TxnAbort, txn_id, 0)
    }

    /// Marker recording the durable frontier at flush time
    #[must_use]
    pub fn delimiter(frontier: CommitId) -> Self {
        Self::txn(LogRecordKind::TxnDelimiter, 0, frontier)
    }

    /// First record of a writer session
    #[must_use]
    pub fn session_start(frontier: CommitId) -> Self {
        let mut record = Self::delimiter(frontier);
        record.header.session_start = true;
        record
    }

    #[must_use]
    pub fn insert(txn_id: TxnId, table: TableId, location: Location, tuple: Vec<u8>) -> Self {
        Self {
            kind: LogRecordKind::TupleInsert,
            header: RecordHeader {
                txn_id,
                table,
                insert_location: Some(location),
                ..RecordHeader::default()
            },
            payload: tuple,
        }
    }

    #[must_use]
    pub fn update(
        txn_id: TxnId,
        table: TableId,
        old_location: Location,
        new_location: Location,
        tuple: Vec<u8>,
    ) -> Self {
        Self {
            kind: LogRecordKind::TupleUpdate,
            header: RecordHeader {
                txn_id,
                table,
                insert_location: Some(new_location),
                delete_location: Some(old_location),
                ..RecordHeader::default()
            },
            payload: tuple,
        }
    }

    #[must_use]
    pub fn delete(txn_id: TxnId, table: TableId, location: Location) -> Self {
        Self {
            kind: LogRecordKind::TupleDelete,
            header: RecordHeader {
                txn_id,
                table,
                delete_location: Some(location),
                ..RecordHeader::default()
            },
            payload: Vec::new(),
        }
    }

    /// True for the delimiter that opens a writer session
    #[must_use]
    pub fn is_session_start(&self) -> bool {
        self.kind == LogRecordKind::TxnDelimiter && self.header.session_start
    }

    /// Check a tuple image fits in one frame
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` above [`MAX_PAYLOAD_SIZE`].
    pub fn check_payload_len(len: usize) -> Result<(), FramingError> {
        if len > MAX_PAYLOAD_SIZE {
            return Err(FramingError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }

    /// Encoded frame size in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_PREFIX_SIZE + MIN_BODY_SIZE + self.payload.len()
    }

    /// Serialize into a fresh buffer
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the frame to `buf`
    ///
    /// The payload must already have passed [`LogRecord::check_payload_len`].
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_SIZE);
        let start = buf.len();
        let header = &self.header;

        buf.push(self.kind.tag());

        // Reserve the length field, patched below
        let len_pos = buf.len();
        buf.extend_from_slice(&[0u8; 4]);

        let mut flags = 0u8;
        if header.insert_location.is_some() {
            flags |= FLAG_INSERT_LOCATION;
        }
        if header.delete_location.is_some() {
            flags |= FLAG_DELETE_LOCATION;
        }
        if header.session_start {
            flags |= FLAG_SESSION_START;
        }

        buf.extend_from_slice(&header.txn_id.to_be_bytes());
        buf.extend_from_slice(&header.commit_id.to_be_bytes());
        buf.extend_from_slice(&header.table.database_id.to_be_bytes());
        buf.extend_from_slice(&header.table.table_id.to_be_bytes());
        buf.push(flags);
        for location in [header.insert_location, header.delete_location] {
            let location = location.unwrap_or(Location::new(0, 0));
            buf.extend_from_slice(&location.segment_id.to_be_bytes());
            buf.extend_from_slice(&location.slot_id.to_be_bytes());
        }
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let body_len = (buf.len() - len_pos - 4 + CRC_SIZE) as u32;
        buf[len_pos..len_pos + 4].copy_from_slice(&body_len.to_be_bytes());

        let crc = CRC_ALGORITHM.checksum(&buf[start..]);
        buf.extend_from_slice(&crc.to_be_bytes());
    }

    /// Decode one frame from the front of `bytes`
    ///
    /// Returns the record and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `FramingError` if the frame is truncated, carries an unknown
    /// kind, fails its checksum or is internally inconsistent.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FramingError> {
        if bytes.len() < FRAME_PREFIX_SIZE {
            return Err(FramingError::Truncated {
                needed: FRAME_PREFIX_SIZE,
                available: bytes.len(),
            });
        }

        let kind =
            LogRecordKind::from_tag(bytes[0]).ok_or(FramingError::UnknownKind(bytes[0]))?;
        let body_len = read_u32(bytes, 1) as usize;
        check_body_len(body_len)?;

        let frame_len = FRAME_PREFIX_SIZE + body_len;
        if bytes.len() < frame_len {
            return Err(FramingError::Truncated {
                needed: frame_len,
                available: bytes.len(),
            });
        }

        let crc_pos = frame_len - CRC_SIZE;
        let expected = read_u32(bytes, crc_pos);
        let actual = CRC_ALGORITHM.checksum(&bytes[..crc_pos]);
        if expected != actual {
            return Err(FramingError::ChecksumMismatch { expected, actual });
        }

        let mut pos = FRAME_PREFIX_SIZE;
        let txn_id = read_u64(bytes, pos);
        let commit_id = read_u64(bytes, pos + 8);
        let database_id = read_u32(bytes, pos + 16);
        let table_id = read_u32(bytes, pos + 20);
        let flags = bytes[pos + 24];
        pos += 25;

        if flags & !KNOWN_FLAGS != 0 {
            return Err(FramingError::Malformed(format!("unknown flags {flags:#04x}")));
        }
        if flags & FLAG_SESSION_START != 0 && kind != LogRecordKind::TxnDelimiter {
            return Err(FramingError::Malformed(
                "session flag on a non-delimiter record".to_string(),
            ));
        }

        let insert = Location::new(read_u32(bytes, pos), read_u32(bytes, pos + 4));
        let delete = Location::new(read_u32(bytes, pos + 8), read_u32(bytes, pos + 12));
        pos += 16;

        let payload_len = read_u32(bytes, pos) as usize;
        pos += 4;
        if payload_len != body_len - MIN_BODY_SIZE {
            return Err(FramingError::Malformed(format!(
                "payload length {payload_len} disagrees with frame length {body_len}"
            )));
        }
        let payload = bytes[pos..pos + payload_len].to_vec();

        let record = Self {
            kind,
            header: RecordHeader {
                txn_id,
                commit_id,
                table: TableId::new(database_id, table_id),
                insert_location: (flags & FLAG_INSERT_LOCATION != 0).then_some(insert),
                delete_location: (flags & FLAG_DELETE_LOCATION != 0).then_some(delete),
                session_start: flags & FLAG_SESSION_START != 0,
            },
            payload,
        };

        Ok((record, frame_len))
    }
}

/// Validate a length field before trusting it
pub(crate) fn check_body_len(body_len: usize) -> Result<(), FramingError> {
    if body_len < MIN_BODY_SIZE {
        return Err(FramingError::Malformed(format!(
            "frame length {body_len} below minimum {MIN_BODY_SIZE}"
        )));
    }
    if body_len > MAX_BODY_SIZE {
        return Err(FramingError::Malformed(format!(
            "frame length {body_len} above maximum {MAX_BODY_SIZE}"
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_be_bytes(raw)
}

fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_be_bytes(raw)
}
