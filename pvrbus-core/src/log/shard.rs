//! Size and count bounded shard files
//!
//! A session is written as a numbered sequence of shard files. The writer
//! opens the first shard as soon as it is created, so an unwritable
//! directory is reported up front rather than on the first message.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::entry::LogEntry;
use super::error::LogError;
use super::session::SHARD_PLACEHOLDER;

/// When to roll over to a new shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLimits {
    /// Entries per shard before rotating
    pub max_entries: u64,

    /// Bytes per shard before rotating; checked before each write, so a
    /// shard may exceed it by at most one entry
    pub max_bytes: u64,

    /// Index of the first shard
    pub start_shard: u64,
}

impl Default for ShardLimits {
    fn default() -> Self {
        Self {
            max_entries: 1_000_000_000_000_000,
            max_bytes: 1_000_000,
            start_shard: 0,
        }
    }
}

#[derive(Debug)]
struct OpenShard {
    file: BufWriter<File>,
    entries: u64,
    bytes: u64,
}

/// Appends entries to a sequence of shard files
#[derive(Debug)]
pub struct ShardWriter {
    pattern: String,
    limits: ShardLimits,
    next_index: u64,
    current: Option<OpenShard>,
    shards: Vec<PathBuf>,
    total_entries: u64,
}

impl ShardWriter {
    /// Create a writer and open its first shard
    ///
    /// `pattern` must contain [`SHARD_PLACEHOLDER`] exactly once.
    pub fn create(pattern: impl Into<String>, limits: ShardLimits) -> Result<Self, LogError> {
        let pattern = pattern.into();
        if pattern.matches(SHARD_PLACEHOLDER).count() != 1 {
            return Err(LogError::InvalidPattern(pattern));
        }

        let mut writer = Self {
            pattern,
            limits,
            next_index: limits.start_shard,
            current: None,
            shards: Vec::new(),
            total_entries: 0,
        };
        writer.open_next()?;
        Ok(writer)
    }

    fn shard_path(&self, index: u64) -> PathBuf {
        PathBuf::from(self.pattern.replace(SHARD_PLACEHOLDER, &index.to_string()))
    }

    fn open_next(&mut self) -> Result<(), LogError> {
        self.close_current()?;

        let path = self.shard_path(self.next_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened shard");

        self.next_index += 1;
        self.shards.push(path);
        self.current = Some(OpenShard {
            file: BufWriter::new(file),
            entries: 0,
            bytes: 0,
        });
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), LogError> {
        if let Some(mut shard) = self.current.take() {
            shard.file.flush()?;
            shard.file.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn needs_rotation(&self) -> bool {
        match &self.current {
            None => true,
            Some(shard) => {
                shard.entries >= self.limits.max_entries || shard.bytes >= self.limits.max_bytes
            }
        }
    }

    /// Append one entry, rotating first when the open shard is full
    ///
    /// Returns the framed size written.
    pub fn write(&mut self, entry: &LogEntry) -> Result<usize, LogError> {
        if self.needs_rotation() {
            self.open_next()?;
        }
        let frame = entry.encode()?;

        let Some(shard) = self.current.as_mut() else {
            return Err(LogError::Io(std::io::Error::other("no open shard")));
        };
        shard.file.write_all(&frame)?;
        shard.entries += 1;
        shard.bytes += frame.len() as u64;
        self.total_entries += 1;
        Ok(frame.len())
    }

    /// Flush and close the open shard; later calls do nothing
    pub fn finish(&mut self) -> Result<(), LogError> {
        self.close_current()
    }

    /// Shard files created so far, in write order
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    /// Entries written across all shards
    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close_current() {
            warn!(error = %e, pattern = %self.pattern, "failed to close shard");
        }
    }
}
