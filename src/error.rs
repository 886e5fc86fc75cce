//! WAL error types

use thiserror::Error;

use crate::wal::TxnId;

/// Main WAL error type
#[derive(Debug, Error)]
pub enum WalError {
    // ========== Log Format Errors ==========
    /// A frame could not be decoded
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    // ========== Durability Errors ==========
    /// Write, fsync or open failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The logging subsystem has halted and can no longer promise durability
    #[error("logging subsystem degraded: {0}")]
    Degraded(String),

    // ========== Protocol Errors ==========
    /// The log contradicts the transaction protocol (e.g. commit without begin)
    #[error("protocol violation for txn {txn_id}: {reason}")]
    ProtocolViolation { txn_id: TxnId, reason: String },

    /// A producer found the buffer pool full
    #[error("buffer pool capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    /// Operation is not allowed in the current lifecycle state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    // ========== Collaborator Errors ==========
    /// Storage layer rejected a redo/undo step
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WalError {
    /// Build a protocol violation for the given transaction
    pub fn protocol(txn_id: TxnId, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            txn_id,
            reason: reason.into(),
        }
    }

    /// Build an invalid state error from anything that prints
    pub fn invalid_state(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Frame decoding errors
///
/// During replay these are never fatal: the reader logs them and treats the
/// frame as the end of the file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer bytes available than the frame needs
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Kind tag is not a known record kind
    #[error("unknown record kind: {0:#04x}")]
    UnknownKind(u8),

    /// Frame checksum does not match its contents
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Declared length runs past the end of the file
    #[error("declared length {declared} overruns remaining {remaining} bytes")]
    LengthOverrun { declared: u64, remaining: u64 },

    /// Frame is internally inconsistent
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Tuple image too large to fit in one frame
    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors raised by a recovery storage implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Table or segment does not exist
    #[error("missing segment {segment_id} in table {table}")]
    MissingSegment { table: String, segment_id: u32 },

    /// Slot does not hold a tuple
    #[error("missing slot {location} in table {table}")]
    MissingSlot { table: String, location: String },

    /// Anything else the storage layer reports
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Result type alias for WAL operations
pub type WalResult<T> = Result<T, WalError>;
