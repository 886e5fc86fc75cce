//! Log file set with size-based rotation
//!
//! # File Naming
//!
//! - `log_dir/log_{number:08}.wal`, numbers strictly increasing
//!
//! Every writer session starts a fresh file numbered after the highest one
//! on disk, so a file torn by a crash is never appended to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::traits::LogSink;

const FILE_PREFIX: &str = "log_";
const FILE_SUFFIX: &str = ".wal";

/// Path of log file `number` in `log_dir`
#[must_use]
pub fn log_file_path(log_dir: &Path, number: u64) -> PathBuf {
    log_dir.join(format!("{FILE_PREFIX}{number:08}{FILE_SUFFIX}"))
}

fn parse_file_number(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// All log files in `log_dir`, oldest first
///
/// A missing directory holds no files.
///
/// # Errors
///
/// Returns `io::Error` if the directory cannot be listed
pub fn list_log_files(log_dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(number) = parse_file_number(&name.to_string_lossy()) {
            files.push((number, entry.path()));
        }
    }

    files.sort_by_key(|(number, _)| *number);
    Ok(files)
}

/// Append-only log files owned by the frontend
pub struct LogFileSet {
    log_dir: PathBuf,

    /// Active file, opened lazily on first append
    current: Option<BufWriter<File>>,

    /// Number of the active (or next) file
    current_number: u64,

    /// Bytes in the active file
    current_size: u64,

    /// Rotate once the active file reaches this size
    rotation_size: u64,

    /// Bytes appended across all files
    total_written: u64,
}

impl LogFileSet {
    /// Prepare a new session in `log_dir`
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the directory cannot be created or listed
    pub fn open(log_dir: impl Into<PathBuf>, rotation_size: u64) -> io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;

        let next_number = list_log_files(&log_dir)?
            .last()
            .map_or(1, |(number, _)| number + 1);

        Ok(Self {
            log_dir,
            current: None,
            current_number: next_number,
            current_size: 0,
            rotation_size: rotation_size.max(1),
            total_written: 0,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Number of the file currently written (or about to be)
    #[must_use]
    pub fn current_number(&self) -> u64 {
        self.current_number
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        log_file_path(&self.log_dir, self.current_number)
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.current.is_none() {
            let path = self.current_path();
            let file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)?;
            sync_dir(&self.log_dir)?;
            info!(path = %path.display(), "Opened log file");
            self.current = Some(BufWriter::new(file));
            self.current_size = 0;
        }
        self.current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file not open"))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer.flush()?;
            writer.into_inner()?.sync_all()?;
        }

        info!(
            closed = self.current_number,
            size = self.current_size,
            "Rotating log file"
        );
        self.current_number += 1;
        self.current_size = 0;
        Ok(())
    }
}

impl LogSink for LogFileSet {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(bytes)?;
        self.current_size += bytes.len() as u64;
        self.total_written += bytes.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        if let Some(writer) = self.current.as_mut() {
            writer.flush()?;
            // CRITICAL: data must be on stable storage before the frontier moves
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn maybe_rotate(&mut self) -> io::Result<()> {
        if self.current.is_some() && self.current_size >= self.rotation_size {
            self.rotate()?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.total_written
    }

    fn close(&mut self) -> io::Result<()> {
        self.sync()?;
        self.current = None;
        Ok(())
    }
}

/// Make a newly created file's directory entry durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_opened_lazily() {
        let dir = tempdir().unwrap();
        let mut files = LogFileSet::open(dir.path(), 1024).unwrap();
        assert!(list_log_files(dir.path()).unwrap().is_empty());

        files.append(b"hello").unwrap();
        files.sync().unwrap();

        let listed = list_log_files(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, 1);
        assert_eq!(fs::read(&listed[0].1).unwrap(), b"hello");
    }

    #[test]
    fn test_new_session_starts_after_highest_file() {
        let dir = tempdir().unwrap();

        // Create files with gaps
        File::create(log_file_path(dir.path(), 3)).unwrap();
        File::create(log_file_path(dir.path(), 7)).unwrap();
        File::create(dir.path().join("unrelated.txt")).unwrap();

        let files = LogFileSet::open(dir.path(), 1024).unwrap();
        assert_eq!(files.current_number(), 8, "should start after highest number");
    }

    #[test]
    fn test_rotation_after_threshold() {
        let dir = tempdir().unwrap();
        let mut files = LogFileSet::open(dir.path(), 8).unwrap();

        files.append(b"0123456789").unwrap();
        files.sync().unwrap();
        files.maybe_rotate().unwrap();
        assert_eq!(files.current_number(), 2);

        files.append(b"abc").unwrap();
        files.sync().unwrap();
        files.maybe_rotate().unwrap();
        assert_eq!(files.current_number(), 2, "below threshold stays put");

        let listed = list_log_files(dir.path()).unwrap();
        assert_eq!(listed.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(files.bytes_written(), 13);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_log_files(&missing).unwrap().is_empty());
    }
}
