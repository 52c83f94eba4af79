//! Error types for pvrbus operations

use crate::bus::BusError;
use crate::log::LogError;
use crate::messages::StatusResponse;
use crate::replay::ReplayError;

/// Result type for pvrbus operations
pub type Result<T> = std::result::Result<T, PvrbusError>;

/// Error types for the bus substrate
#[derive(Debug, thiserror::Error)]
pub enum PvrbusError {
    /// Bus transport failure
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Malformed or unexpected message on a control topic
    #[error("Protocol error ({code}): {message}")]
    Protocol {
        /// Status code reported back on the exception topic
        code: u32,
        /// Human readable reason
        message: String,
    },

    /// Log directory or shard file is not writable
    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    /// Recorded log could not be read
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    /// Replay control failure
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PvrbusError {
    /// Build a protocol error with the given status code
    pub fn protocol(code: u32, message: impl Into<String>) -> Self {
        PvrbusError::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Status code published alongside this error on the exception topic
    pub fn status_code(&self) -> u32 {
        match self {
            PvrbusError::Protocol { code, .. } => *code,
            PvrbusError::Replay(ReplayError::SessionNotFound(_)) => 404,
            PvrbusError::Replay(ReplayError::Log(_)) => 500,
            PvrbusError::Replay(_) | PvrbusError::Serialization(_) => 400,
            PvrbusError::Configuration(_) => 400,
            PvrbusError::Bus(_)
            | PvrbusError::Storage(_)
            | PvrbusError::Log(_)
            | PvrbusError::Io(_)
            | PvrbusError::Other(_) => 500,
        }
    }

    /// Convert into the status payload published on `/server_exception/`
    pub fn status_response(&self) -> StatusResponse {
        let message = match self {
            PvrbusError::Protocol { message, .. } => message.clone(),
            other => other.to_string(),
        };
        StatusResponse::new(self.status_code(), message)
    }
}

impl From<String> for PvrbusError {
    fn from(s: String) -> Self {
        PvrbusError::Other(s)
    }
}

impl From<&str> for PvrbusError {
    fn from(s: &str) -> Self {
        PvrbusError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for PvrbusError {
    fn from(err: anyhow::Error) -> Self {
        PvrbusError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_keeps_code() {
        let err = PvrbusError::protocol(3, "length mismatch");
        let status = err.status_response();
        assert_eq!(status.code, 3);
        assert_eq!(status.message, "length mismatch");
    }

    #[test]
    fn test_replay_errors_map_to_request_codes() {
        let missing = PvrbusError::from(ReplayError::SessionNotFound("abc".into()));
        assert_eq!(missing.status_code(), 404);

        let unloaded = PvrbusError::from(ReplayError::NoSessionLoaded);
        assert_eq!(unloaded.status_code(), 400);
    }

    #[test]
    fn test_unreadable_session_is_internal() {
        let io = std::io::Error::from(std::io::ErrorKind::InvalidData);
        let err = PvrbusError::from(ReplayError::Log(io.into()));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_storage_error_is_internal() {
        let err = PvrbusError::Storage(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(err.status_code(), 500);
    }
}
