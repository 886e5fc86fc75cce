//! wal-core library exports

pub mod config;
pub mod error;
pub mod manager;
pub mod storage;
pub mod traits;
pub mod wal;

// Re-exports
pub use config::{LoggingBackend, WalConfig};
pub use error::{FramingError, StorageError, WalError, WalResult};
pub use manager::{LogManager, LoggingStatus};
pub use storage::MemoryStore;
pub use traits::{LogSink, RecoveryStorage};
pub use wal::{
    BackendLogger, CommitId, FrontendLogger, Location, LogRecord, LogRecordKind, LogRecovery,
    RecoveryStats, TableId, TxnId,
};
