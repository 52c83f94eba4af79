//! Session recorder
//!
//! Owns at most one active recording session. Messages arriving while no
//! session is active are dropped without error.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::entry::{LogEntry, wall_clock_secs};
use super::session::{new_session_id, session_folder_name, shard_pattern};
use super::shard::{ShardLimits, ShardWriter};
use crate::config::LoggerConfig;
use crate::error::{PvrbusError, Result};
use crate::log::LogError;
use crate::messages::LoggerStatus;

/// Identity of a recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Random 16 character id
    pub id: String,

    /// Session folder under the log root
    pub dir: PathBuf,
}

#[derive(Debug)]
struct ActiveSession {
    info: SessionInfo,
    writer: ShardWriter,
    last_time: f64,
}

/// Records bus traffic into session folders
#[derive(Debug)]
pub struct LogRecorder {
    root: PathBuf,
    limits: ShardLimits,
    extension: String,
    active: Option<ActiveSession>,
}

impl LogRecorder {
    /// Create an idle recorder writing under `root`
    pub fn new(root: impl Into<PathBuf>, limits: ShardLimits, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            limits,
            extension: extension.into(),
            active: None,
        }
    }

    /// Create an idle recorder from the logger configuration
    pub fn from_config(config: &LoggerConfig) -> Self {
        Self::new(
            &config.log_root,
            ShardLimits {
                max_entries: config.max_entries,
                max_bytes: config.max_bytes,
                start_shard: config.start_shard,
            },
            &config.extension,
        )
    }

    /// Root directory holding session folders
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new session, finishing the active one first
    ///
    /// On failure the recorder is left with no active session.
    pub fn new_session(&mut self) -> Result<SessionInfo> {
        self.stop_session()?;

        let id = new_session_id();
        let folder = session_folder_name(&id);
        let dir = self.root.join(&folder);
        std::fs::create_dir_all(&dir).map_err(PvrbusError::Storage)?;

        let pattern = shard_pattern(&dir, &folder, &self.extension);
        let writer = ShardWriter::create(pattern, self.limits).map_err(|e| match e {
            LogError::Io(io) => PvrbusError::Storage(io),
            other => PvrbusError::Log(other),
        })?;

        let info = SessionInfo { id, dir };
        info!(session_id = %info.id, dir = %info.dir.display(), "recording started");
        self.active = Some(ActiveSession {
            info: info.clone(),
            writer,
            last_time: f64::NEG_INFINITY,
        });
        Ok(info)
    }

    /// Finish the active session; no-op when idle
    pub fn stop_session(&mut self) -> Result<()> {
        if let Some(mut session) = self.active.take() {
            session.writer.finish()?;
            info!(
                session_id = %session.info.id,
                entries = session.writer.total_entries(),
                shards = session.writer.shards().len(),
                "recording stopped"
            );
        }
        Ok(())
    }

    /// Record a message stamped with the current wall-clock time
    pub fn write(&mut self, topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Result<()> {
        self.write_at(wall_clock_secs(), topic, payload)
    }

    /// Record a message with an explicit receipt time
    ///
    /// Times within a session never decrease; an earlier stamp is raised to
    /// the previous one.
    pub fn write_at(
        &mut self,
        time: f64,
        topic: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let Some(session) = self.active.as_mut() else {
            return Ok(());
        };

        if time < session.last_time {
            warn!(
                time,
                last_time = session.last_time,
                "clock went backwards, clamping entry time"
            );
        }
        let time = time.max(session.last_time);
        session.last_time = time;

        session
            .writer
            .write(&LogEntry::new(time, topic, payload))
            .map_err(|e| match e {
                LogError::Io(io) => PvrbusError::Storage(io),
                other => PvrbusError::Log(other),
            })?;
        Ok(())
    }

    /// Active session, if any
    pub fn session(&self) -> Option<&SessionInfo> {
        self.active.as_ref().map(|s| &s.info)
    }

    /// Whether a session is being recorded
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Status payload for `/loggerd/status/`
    pub fn status(&self) -> LoggerStatus {
        LoggerStatus {
            recording: self.is_recording(),
            session_id: self
                .session()
                .map(|s| s.id.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::session::{list_sessions, list_shards};

    fn recorder(root: &Path, max_entries: u64) -> LogRecorder {
        LogRecorder::new(
            root,
            ShardLimits {
                max_entries,
                ..Default::default()
            },
            "pvrlog",
        )
    }

    #[test]
    fn test_idle_writes_are_dropped() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path(), 10);
        rec.write(&b"/t/"[..], &b"x"[..]).unwrap();
        assert!(!rec.is_recording());
        assert!(list_sessions(root.path()).unwrap().logs.is_empty());
    }

    #[test]
    fn test_session_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path(), 3);

        let info = rec.new_session().unwrap();
        assert_eq!(rec.status().session_id, info.id);
        assert!(rec.status().recording);
        for i in 0..7u8 {
            rec.write(&b"/t/"[..], vec![i]).unwrap();
        }
        rec.stop_session().unwrap();
        rec.stop_session().unwrap();

        assert!(!rec.status().recording);
        assert_eq!(rec.status().session_id, "");
        assert_eq!(list_shards(&info.dir, "pvrlog").unwrap().len(), 3);
        let folder = info.dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(folder.starts_with(&format!("{}--", info.id)));
    }

    #[test]
    fn test_new_session_finishes_previous() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path(), 100);

        let first = rec.new_session().unwrap();
        rec.write(&b"/t/"[..], &b"a"[..]).unwrap();
        let second = rec.new_session().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(rec.session().unwrap().id, second.id);
        let shard = &list_shards(&first.dir, "pvrlog").unwrap()[0];
        assert!(std::fs::metadata(shard).unwrap().len() > 0);
    }

    #[test]
    fn test_unwritable_root_leaves_recorder_idle() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let mut rec = recorder(&blocker, 10);
        assert!(matches!(rec.new_session(), Err(PvrbusError::Storage(_))));
        assert!(!rec.is_recording());
    }

    #[test]
    fn test_times_never_decrease() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path(), 100);
        let info = rec.new_session().unwrap();

        rec.write_at(10.0, &b"/t/"[..], &b"a"[..]).unwrap();
        rec.write_at(9.0, &b"/t/"[..], &b"b"[..]).unwrap();
        rec.write_at(11.0, &b"/t/"[..], &b"c"[..]).unwrap();
        rec.stop_session().unwrap();

        let shard = &list_shards(&info.dir, "pvrlog").unwrap()[0];
        let data = Bytes::from(std::fs::read(shard).unwrap());
        let times: Vec<f64> = LogEntry::frames(data).map(|e| e.unwrap().time).collect();
        assert_eq!(times, vec![10.0, 10.0, 11.0]);
    }
}
