//! Destination for flushed log bytes

use std::io;

/// Where the frontend writes collected frames
///
/// Owned exclusively by the frontend thread.
pub trait LogSink: Send {
    /// Append encoded frames
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Force everything appended so far to stable storage
    fn sync(&mut self) -> io::Result<()>;

    /// Switch to a new file if the current one is large enough
    ///
    /// Only called right after a successful `sync`.
    fn maybe_rotate(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Total bytes appended through this sink
    fn bytes_written(&self) -> u64;

    /// Sync and release the underlying resources
    fn close(&mut self) -> io::Result<()> {
        self.sync()
    }
}

/// Diagnostic sink: counts bytes, persists nothing
#[derive(Debug, Default)]
pub struct NullSink {
    bytes: u64,
}

impl LogSink for NullSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}
