//! Error types for replay control

use thiserror::Error;

use crate::log::LogError;

/// Replay specific errors
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A command needs a loaded session
    #[error("no log loaded")]
    NoSessionLoaded,

    /// No session folder with this id under the log root
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session could not be read
    #[error(transparent)]
    Log(#[from] LogError),
}
