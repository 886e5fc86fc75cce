//! Damage log files the way crashes and bad disks do

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct CorruptionInjector {
    path: PathBuf,
}

impl CorruptionInjector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn len(&self) -> u64 {
        fs::metadata(&self.path).expect("log file missing").len()
    }

    /// Cut `bytes` off the end, like a write torn by a crash
    pub fn truncate_by(&self, bytes: u64) {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .expect("Failed to open log file");
        let len = file.metadata().unwrap().len();
        file.set_len(len.saturating_sub(bytes)).unwrap();
    }

    /// Flip one bit at `offset`
    pub fn flip_bit(&self, offset: u64, bit: u8) {
        let mut bytes = fs::read(&self.path).expect("Failed to read log file");
        bytes[offset as usize] ^= 1 << bit;
        fs::write(&self.path, bytes).unwrap();
    }

    /// Append bytes that are not a valid frame
    pub fn append_garbage(&self, garbage: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("Failed to open log file");
        file.write_all(garbage).unwrap();
    }
}
