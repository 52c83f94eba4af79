//! Well-known bus topics
//!
//! Topics are byte strings matched by subscriber prefix filters, so every
//! topic ends with `/` to keep prefixes from matching sibling names.

/// Starts a fresh recording session (zero payload)
pub const LOGGERD_START: &[u8] = b"/loggerd/start/";
/// Stops the active recording session (zero payload)
pub const LOGGERD_STOP: &[u8] = b"/loggerd/stop/";
/// Recorder status, once per second
pub const LOGGERD_STATUS: &[u8] = b"/loggerd/status/";

/// Prefix shared by every replayer command topic
pub const REPLAYD_IN: &[u8] = b"/replayd/in/";
/// Ask for the list of recorded sessions
pub const REPLAYD_LIST_REQUEST: &[u8] = b"/replayd/in/listrequest/";
/// Response to [`REPLAYD_LIST_REQUEST`]
pub const REPLAYD_LIST: &[u8] = b"/replayd/list/";
/// Load a session for replay
pub const REPLAYD_LOAD: &[u8] = b"/replayd/in/load/";
/// Toggle looping
pub const REPLAYD_LOOP: &[u8] = b"/replayd/in/loop/";
/// Start playing
pub const REPLAYD_START: &[u8] = b"/replayd/in/start/";
/// Pause playing
pub const REPLAYD_STOP: &[u8] = b"/replayd/in/stop/";
/// Scrub to a recorded time
pub const REPLAYD_SCRUB: &[u8] = b"/replayd/in/scrub/";
/// Replayer status, once per second
pub const REPLAYD_STATUS: &[u8] = b"/replayd/status/";

/// Recoverable daemon errors
pub const SERVER_EXCEPTION: &[u8] = b"/server_exception/";

/// Wall clock published by the time daemon
pub const TIME: &[u8] = b"/mp/time/";

/// Liveness heartbeats consumed by the supervisor watchdog
pub const HEARTBEAT: &[u8] = b"/manager/heartbeat/";

/// Prefixes never re-emitted by the replayer
pub const DEFAULT_REPLAY_EXCLUDED: &[&str] = &["/loggerd/", "/replayd/"];

/// Render a topic for log output
pub fn display(topic: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(topic)
}
