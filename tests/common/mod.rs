//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure including:
//! - Config and manager setup over a temporary log directory
//! - Hand-written log files for recovery tests
//! - A corruption injector for torn and damaged files

pub mod corruption;
pub mod fixtures;

// Re-export commonly used items
pub use corruption::*;
pub use fixtures::*;

pub use std::sync::Arc;
pub use tempfile::{tempdir, TempDir};
