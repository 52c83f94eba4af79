//! Sharded append-only recording of bus traffic
//!
//! A session is one folder under the log root holding numbered shard files:
//!
//! ```text
//! {log_root}/{session_id}--{timestamp}/{session_id}--{timestamp}--{shard}.pvrlog
//! ```
//!
//! Shards are raw concatenations of length-framed [`LogEntry`] records with
//! no header or footer, so a shard cut short by a crash stays readable up to
//! its last complete record. Entries within a session never go back in time.

mod entry;
mod error;
mod reader;
mod recorder;
mod session;
mod shard;

pub use entry::{EntryFrames, LogEntry, wall_clock_secs};
pub use error::LogError;
pub use reader::LogReader;
pub use recorder::{LogRecorder, SessionInfo};
pub use session::{
    SHARD_PLACEHOLDER, list_sessions, list_shards, new_session_id, session_folder_name,
    shard_index,
};
pub use shard::{ShardLimits, ShardWriter};
