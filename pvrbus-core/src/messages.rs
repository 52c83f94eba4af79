//! Control and status payloads exchanged by the bus-substrate daemons
//!
//! Application payloads stay opaque byte blobs; only the messages the
//! recorder, replayer, clock and supervisor understand themselves are typed
//! here. They travel as JSON.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{PvrbusError, Result};

/// Status reply published on the exception topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Status code (0 = ok)
    pub code: u32,
    /// Human readable message
    pub message: String,
}

impl StatusResponse {
    /// Create a new status response
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Recorder status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerStatus {
    /// Whether a session is being recorded
    pub recording: bool,
    /// Active session id, empty when idle
    pub session_id: String,
}

/// Replayer status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayerStatus {
    /// Whether entries are being emitted
    pub playing: bool,
    /// Cursor position in recorded time
    pub time: f64,
    /// Loaded session id, empty when idle
    pub session_id: String,
    /// Timestamp of the first recorded entry
    pub start_time: f64,
    /// Timestamp of the last recorded entry
    pub end_time: f64,
    /// Whether replay restarts at the end
    #[serde(rename = "loop")]
    pub looping: bool,
}

/// One recorded session in a [`LogList`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogListEntry {
    /// Session folder name
    pub id: String,
    /// Modification time (seconds since the epoch)
    pub mtime: i64,
}

/// Sessions available for replay, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogList {
    /// Known sessions
    pub logs: Vec<LogListEntry>,
}

/// Request to load a session into the replayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadLogRequest {
    /// Session folder name under the log root
    pub session_id: String,
    /// Recorded time to start from
    #[serde(default)]
    pub start_time: f64,
    /// Restart from the beginning when the end is reached
    #[serde(default, rename = "loop")]
    pub looping: bool,
    /// Start playing immediately
    #[serde(default)]
    pub autoplay: bool,
}

/// Single boolean payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolValue {
    /// Value
    pub value: bool,
}

/// Single float payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatValue {
    /// Value
    pub value: f64,
}

/// Wall clock published by the time daemon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeMessage {
    /// Milliseconds since the epoch
    pub millis: f64,
}

/// Liveness heartbeat from a supervised daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Name the supervisor knows the daemon by
    pub name: String,
}

/// Serialize a control payload
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Parse a control payload received on `topic`
///
/// Malformed payloads become protocol errors so the caller can reject the
/// single request and keep its loop running.
pub fn decode<T: DeserializeOwned>(topic: &[u8], payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| {
        PvrbusError::protocol(
            400,
            format!(
                "malformed payload on {}: {}",
                crate::topics::display(topic),
                e
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_request_defaults() {
        let req: LoadLogRequest = decode(b"/replayd/in/load/", br#"{"session_id":"abc"}"#).unwrap();
        assert_eq!(req.session_id, "abc");
        assert_eq!(req.start_time, 0.0);
        assert!(!req.looping);
        assert!(!req.autoplay);
    }

    #[test]
    fn test_replayer_status_uses_loop_key() {
        let status = ReplayerStatus {
            looping: true,
            ..Default::default()
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&status).unwrap()).unwrap();
        assert_eq!(json["loop"], true);
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let err = decode::<FloatValue>(b"/replayd/in/scrub/", b"not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("/replayd/in/scrub/"));
    }
}
