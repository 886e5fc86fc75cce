//! Storage module
//!
//! The logging core only talks to storage through `RecoveryStorage`; this
//! module provides the in-memory implementation used by the CLI and tests.

pub mod memory;

// Re-export RecoveryStorage trait from traits module
pub use crate::traits::RecoveryStorage;

pub use memory::{MemoryStore, StoredTuple};
