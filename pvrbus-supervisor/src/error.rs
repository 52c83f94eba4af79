//! Supervisor errors

use thiserror::Error;

/// Result alias used across the supervisor
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Failures of the supervisor itself; child crashes are not errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A declared process cannot be started at all
    #[error("Cannot spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<pvrbus_core::error::PvrbusError> for SupervisorError {
    fn from(err: pvrbus_core::error::PvrbusError) -> Self {
        match err {
            pvrbus_core::error::PvrbusError::Configuration(message) => {
                SupervisorError::Configuration(message)
            }
            other => SupervisorError::Other(anyhow::Error::new(other)),
        }
    }
}
