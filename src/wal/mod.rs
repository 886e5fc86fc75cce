//! Write-ahead logging core
//!
//! Backends append records to private buffers and hand them to a shared
//! ring; a single frontend writes them out, fsyncs, and publishes the
//! durable frontier. Recovery replays the files after a crash.

pub mod backend;
pub mod buffer;
pub mod context;
pub mod files;
pub mod frontend;
pub mod frontier;
pub mod pool;
pub mod reader;
pub mod record;
pub mod recovery;

pub use backend::{BackendLogger, BackendStatus};
pub use buffer::TransferBuffer;
pub use context::{BackendSnapshot, LogContext};
pub use files::{list_log_files, log_file_path, LogFileSet};
pub use frontend::{compute_candidate, FrontendLogger};
pub use frontier::DurableFrontier;
pub use pool::CircularBufferPool;
pub use reader::{LogReader, ReadOutcome};
pub use record::{CommitId, Location, LogRecord, LogRecordKind, RecordHeader, TableId, TxnId};
pub use recovery::{LogRecovery, RecoveryStats};
