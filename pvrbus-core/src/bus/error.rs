//! Error types for bus operations

use thiserror::Error;

/// Bus specific errors
#[derive(Debug, Error)]
pub enum BusError {
    /// The other end of the socket went away
    #[error("Bus connection closed")]
    Closed,

    /// Topic does not fit in a frame
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Could not reach the proxy
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Address that refused the connection
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be decoded
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// Socket I/O failure
    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}
