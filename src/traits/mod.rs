//! Trait definitions for the collaborators of the logging core

pub mod sink;
pub mod storage;

pub use sink::{LogSink, NullSink};
pub use storage::{RecoveryStorage, TupleSlot};
