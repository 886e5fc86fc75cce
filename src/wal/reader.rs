//! Sequential frame reader for replay
//!
//! The reader knows how many bytes the file holds, so a frame whose declared
//! length would run past the end is rejected before its body is read.

use std::io::{self, Read};

use super::record::{check_body_len, LogRecord, LogRecordKind, FRAME_PREFIX_SIZE};
use crate::error::FramingError;

/// What the reader found at the current offset
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete, checksummed record
    Record(LogRecord),
    /// Clean end of file at a frame boundary
    End,
    /// Partial or corrupt frame; nothing past `offset` can be trusted
    Torn { offset: u64, error: FramingError },
}

/// Reads frames from a log file
pub struct LogReader<R: Read> {
    reader: R,
    offset: u64,
    file_len: u64,
}

impl<R: Read> LogReader<R> {
    /// Create reader over `file_len` bytes of `reader`
    pub fn new(reader: R, file_len: u64) -> Self {
        Self {
            reader,
            offset: 0,
            file_len,
        }
    }

    /// Bytes consumed by complete frames so far
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next frame
    ///
    /// # Errors
    ///
    /// Returns `io::Error` only for genuine read failures. Short reads and
    /// corrupt frames are reported as `ReadOutcome::Torn`.
    pub fn next_frame(&mut self) -> io::Result<ReadOutcome> {
        let remaining = self.file_len.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(ReadOutcome::End);
        }
        if remaining < FRAME_PREFIX_SIZE as u64 {
            return Ok(self.torn(FramingError::Truncated {
                needed: FRAME_PREFIX_SIZE,
                available: remaining as usize,
            }));
        }

        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        if let Some(error) = self.fill(&mut prefix)? {
            return Ok(self.torn(error));
        }

        if LogRecordKind::from_tag(prefix[0]).is_none() {
            return Ok(self.torn(FramingError::UnknownKind(prefix[0])));
        }

        let body_len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
        if let Err(error) = check_body_len(body_len) {
            return Ok(self.torn(error));
        }
        let body_remaining = remaining - FRAME_PREFIX_SIZE as u64;
        if body_len as u64 > body_remaining {
            return Ok(self.torn(FramingError::LengthOverrun {
                declared: body_len as u64,
                remaining: body_remaining,
            }));
        }

        let mut frame = vec![0u8; FRAME_PREFIX_SIZE + body_len];
        frame[..FRAME_PREFIX_SIZE].copy_from_slice(&prefix);
        if let Some(error) = self.fill(&mut frame[FRAME_PREFIX_SIZE..])? {
            return Ok(self.torn(error));
        }

        match LogRecord::decode(&frame) {
            Ok((record, used)) => {
                self.offset += used as u64;
                Ok(ReadOutcome::Record(record))
            }
            Err(error) => Ok(self.torn(error)),
        }
    }

    /// Read exactly `buf.len()` bytes, mapping a short read to a framing error
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Option<FramingError>> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Some(FramingError::Truncated {
                needed: buf.len(),
                available: 0,
            })),
            Err(e) => Err(e),
        }
    }

    fn torn(&self, error: FramingError) -> ReadOutcome {
        ReadOutcome::Torn {
            offset: self.offset,
            error,
        }
    }
}
