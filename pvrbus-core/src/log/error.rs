//! Error types for log operations

use std::path::PathBuf;
use thiserror::Error;

/// Recording and reading errors
#[derive(Debug, Error)]
pub enum LogError {
    /// Session folder holds no shard with at least one entry
    #[error("Session has no entries: {0}")]
    EmptySession(PathBuf),

    /// Shard filename pattern is unusable
    #[error("Invalid shard pattern: {0}")]
    InvalidPattern(String),

    /// A record claims a layout that cannot be right
    #[error("Corrupt record at byte {offset}: {reason}")]
    Corrupt {
        /// Offset of the record within its shard
        offset: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Filesystem failure
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),
}
