//! Replay state machine and pacing loop
//!
//! Entries are emitted with the gaps they were recorded with, measured from
//! the last emitted entry or seek target.

use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ReplayError;
use crate::bus::{BusMessage, Publisher};
use crate::config::ReplayConfig;
use crate::daemon::{publish_exception, publish_json};
use crate::log::{LogEntry, LogReader};
use crate::messages::{LoadLogRequest, ReplayerStatus};
use crate::topics;

/// Replay state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// No session loaded
    Idle,
    /// Session loaded, never started
    Loaded,
    /// Emitting entries
    Playing,
    /// Stopped by the operator or at the end of the session
    Paused,
}

/// Control request for the scheduler loop
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayCommand {
    /// Load a session, replacing any loaded one
    Load(LoadLogRequest),
    /// Enable or disable looping
    SetLoop(bool),
    /// Start or resume playback
    Play,
    /// Pause playback
    Pause,
    /// Seek to a recorded time, keeping the play state
    Scrub(f64),
    /// Drop the loaded session
    Unload,
}

#[derive(Debug)]
struct Loaded {
    session_id: String,
    reader: LogReader,
}

/// Paces recorded entries onto the bus
#[derive(Debug)]
pub struct ReplayScheduler {
    log_root: PathBuf,
    extension: String,
    excluded: Vec<Bytes>,
    status_interval: Duration,
    loaded: Option<Loaded>,
    state: ReplayState,
    // Recorded time of the last emitted entry or seek target.
    position: f64,
    // Wall-clock instant matching `position` while playing.
    anchor: Option<Instant>,
    pending: Option<LogEntry>,
}

impl ReplayScheduler {
    /// Create an idle scheduler
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            log_root: config.log_root.clone(),
            extension: config.extension.clone(),
            excluded: config
                .excluded_prefixes
                .iter()
                .map(|p| Bytes::from(p.clone().into_bytes()))
                .collect(),
            status_interval: config.status_interval,
            loaded: None,
            state: ReplayState::Idle,
            position: 0.0,
            anchor: None,
            pending: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ReplayState {
        self.state
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, ReplayError> {
        let mut components = Path::new(session_id).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        let dir = self.log_root.join(session_id);
        if !single || !dir.is_dir() {
            return Err(ReplayError::SessionNotFound(session_id.to_string()));
        }
        Ok(dir)
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded, ReplayError> {
        self.loaded.as_mut().ok_or(ReplayError::NoSessionLoaded)
    }

    /// Load a session and position it at the requested start time
    ///
    /// Allowed in any state. The previous session is dropped only once the
    /// new one has opened.
    pub fn load(&mut self, request: &LoadLogRequest) -> Result<(), ReplayError> {
        let dir = self.session_dir(&request.session_id)?;
        let mut reader = LogReader::open(&dir, &self.extension)?;
        reader.set_looping(request.looping);
        reader.seek(request.start_time)?;

        info!(
            session_id = %request.session_id,
            start_time = reader.start_time(),
            end_time = reader.end_time(),
            looping = request.looping,
            "session loaded"
        );
        self.position = request.start_time.max(reader.start_time());
        self.loaded = Some(Loaded {
            session_id: request.session_id.clone(),
            reader,
        });
        self.pending = None;
        self.anchor = None;
        self.state = ReplayState::Loaded;

        if request.autoplay {
            self.play()?;
        }
        Ok(())
    }

    /// Start or resume playback from the current position
    pub fn play(&mut self) -> Result<(), ReplayError> {
        if self.loaded.is_none() {
            return Err(ReplayError::NoSessionLoaded);
        }
        self.anchor = Some(Instant::now());
        self.state = ReplayState::Playing;
        debug!(position = self.position, "playing");
        Ok(())
    }

    /// Pause playback; does nothing unless playing
    pub fn pause(&mut self) {
        if self.state == ReplayState::Playing {
            self.state = ReplayState::Paused;
            self.anchor = None;
            debug!(position = self.position, "paused");
        }
    }

    /// Seek to `time`, keeping the play state
    pub fn scrub(&mut self, time: f64) -> Result<(), ReplayError> {
        let was_playing = self.state == ReplayState::Playing;
        self.pause();

        let pending = self.pending.take();
        let loaded = self.loaded_mut()?;
        if let Some(entry) = pending {
            loaded.reader.unread(entry);
        }
        loaded.reader.seek(time)?;
        let start = loaded.reader.start_time();
        self.position = time.max(start);

        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Enable or disable looping of the loaded session
    pub fn set_loop(&mut self, looping: bool) -> Result<(), ReplayError> {
        self.loaded_mut()?.reader.set_looping(looping);
        Ok(())
    }

    /// Drop the loaded session
    pub fn unload(&mut self) {
        self.loaded = None;
        self.pending = None;
        self.anchor = None;
        self.position = 0.0;
        self.state = ReplayState::Idle;
    }

    /// Apply one control request
    pub fn apply(&mut self, command: ReplayCommand) -> Result<(), ReplayError> {
        match command {
            ReplayCommand::Load(request) => self.load(&request),
            ReplayCommand::SetLoop(looping) => self.set_loop(looping),
            ReplayCommand::Play => self.play(),
            ReplayCommand::Pause => {
                self.pause();
                Ok(())
            }
            ReplayCommand::Scrub(time) => self.scrub(time),
            ReplayCommand::Unload => {
                self.unload();
                Ok(())
            }
        }
    }

    /// Status payload for `/replayd/status/`
    pub fn status(&self) -> ReplayerStatus {
        match &self.loaded {
            Some(loaded) => ReplayerStatus {
                playing: self.state == ReplayState::Playing,
                time: self.position,
                session_id: loaded.session_id.clone(),
                start_time: loaded.reader.start_time(),
                end_time: loaded.reader.end_time(),
                looping: loaded.reader.looping(),
            },
            None => ReplayerStatus::default(),
        }
    }

    fn is_excluded(&self, topic: &[u8]) -> bool {
        self.excluded.iter().any(|prefix| topic.starts_with(prefix))
    }

    /// Make sure the next emittable entry is buffered while playing
    ///
    /// Reaching the end of a non-looping session pauses playback.
    fn fill_pending(&mut self) -> Result<(), ReplayError> {
        if self.state != ReplayState::Playing || self.pending.is_some() {
            return Ok(());
        }
        loop {
            let next = self.loaded_mut()?.reader.next_entry()?;
            match next {
                Some(entry) if self.is_excluded(&entry.topic) => continue,
                Some(entry) => {
                    // Wrapped to the start of a looping session.
                    if entry.time < self.position {
                        self.position = entry.time;
                        self.anchor = Some(Instant::now());
                    }
                    self.pending = Some(entry);
                    return Ok(());
                }
                None => {
                    info!(position = self.position, "end of session");
                    self.pause();
                    return Ok(());
                }
            }
        }
    }

    /// Wall-clock instant at which the buffered entry is due
    fn deadline(&self) -> Option<Instant> {
        let entry = self.pending.as_ref()?;
        let anchor = self.anchor?;
        let gap = (entry.time - self.position).max(0.0);
        Some(anchor + Duration::from_secs_f64(gap))
    }

    fn take_due(&mut self) -> Option<LogEntry> {
        let entry = self.pending.take()?;
        if let Some(anchor) = self.anchor {
            self.anchor = Some(anchor + Duration::from_secs_f64((entry.time - self.position).max(0.0)));
        }
        self.position = entry.time;
        Some(entry)
    }

    /// Run the scheduler until `shutdown` fires or the command channel closes
    ///
    /// Command failures are reported on `/server_exception/` and never stop
    /// the loop.
    pub async fn run(
        mut self,
        publisher: Box<dyn Publisher>,
        mut commands: mpsc::Receiver<ReplayCommand>,
        shutdown: CancellationToken,
    ) {
        let mut status_tick =
            tokio::time::interval_at(Instant::now() + self.status_interval, self.status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if let Err(e) = self.fill_pending() {
                warn!(error = %e, "replay read failed, pausing");
                self.pause();
                publish_exception(publisher.as_ref(), e.into()).await;
            }
            let deadline = self.deadline();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    debug!(?command, "replay command");
                    if let Err(e) = self.apply(command) {
                        warn!(error = %e, "replay command rejected");
                        publish_exception(publisher.as_ref(), e.into()).await;
                    }
                }
                _ = status_tick.tick() => {
                    publish_json(publisher.as_ref(), topics::REPLAYD_STATUS, &self.status()).await;
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    if let Some(entry) = self.take_due() {
                        let message = BusMessage::new(entry.topic, entry.payload);
                        if let Err(e) = publisher.send(message).await {
                            warn!(error = %e, "failed to publish replayed entry");
                        }
                    }
                }
            }
        }
        info!("replay scheduler stopped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
