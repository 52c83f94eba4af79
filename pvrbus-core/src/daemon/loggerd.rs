//! Recording daemon
//!
//! Drains every topic on the bus and appends each message to the active
//! session. `/loggerd/start/` and `/loggerd/stop/` open and close sessions;
//! the trigger itself is written before it takes effect, so a stop trigger is
//! the last entry of the session it ends.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{publish_exception, publish_json};
use crate::bus::{Bus, BusMessage, Publisher, Subscriber};
use crate::config::LoggerConfig;
use crate::error::{PvrbusError, Result};
use crate::freshest::drain_all;
use crate::log::LogRecorder;
use crate::messages::LoggerStatus;
use crate::topics;

/// Recorder daemon with its bus handles
#[derive(Debug)]
pub struct Loggerd {
    config: LoggerConfig,
    recorder: LogRecorder,
    subscriber: Box<dyn Subscriber>,
    publisher: Arc<dyn Publisher>,
    status: watch::Sender<LoggerStatus>,
}

impl Loggerd {
    /// Connect to the bus and subscribe to every topic
    pub async fn connect(bus: &dyn Bus, config: LoggerConfig) -> Result<Self> {
        let subscriber = bus.subscriber_for(&[b""]).await?;
        let publisher: Arc<dyn Publisher> = Arc::from(bus.publisher().await?);
        let recorder = LogRecorder::from_config(&config);
        let (status, _) = watch::channel(recorder.status());
        info!(log_root = %recorder.root().display(), "logger ready");

        Ok(Self {
            config,
            recorder,
            subscriber,
            publisher,
            status,
        })
    }

    /// Status updates, one value per change
    pub fn status(&self) -> watch::Receiver<LoggerStatus> {
        self.status.subscribe()
    }

    async fn handle(&mut self, message: BusMessage) {
        if let Err(e) = self.recorder.write(message.topic.clone(), message.payload) {
            error!(error = %e, "recording failed, closing session");
            if let Err(e) = self.recorder.stop_session() {
                warn!(error = %e, "failed to close session");
            }
            publish_exception(self.publisher.as_ref(), e).await;
        }

        let result: Result<()> = match message.topic.as_ref() {
            t if t == topics::LOGGERD_STOP => self.recorder.stop_session(),
            t if t == topics::LOGGERD_START => self.recorder.new_session().map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(error = %e, "session control failed");
            publish_exception(self.publisher.as_ref(), e).await;
        }

        let current = self.recorder.status();
        self.status.send_if_modified(|status| {
            let changed = *status != current;
            *status = current;
            changed
        });
    }

    /// Record until `shutdown` fires, then close the active session
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let status_task = spawn_status_loop(
            self.publisher.clone(),
            self.status(),
            self.config.status_interval,
            shutdown.child_token(),
        );

        let result = loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                batch = drain_all(self.subscriber.as_mut(), self.config.drain_batch) => batch,
            };
            match batch {
                Ok(messages) => {
                    for message in messages {
                        self.handle(message).await;
                    }
                }
                Err(e) => break Err(PvrbusError::from(e)),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        self.recorder.stop_session()?;
        status_task.abort();
        info!("logger stopped");
        result
    }
}

fn spawn_status_loop(
    publisher: Arc<dyn Publisher>,
    status: watch::Receiver<LoggerStatus>,
    every: std::time::Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let current = status.borrow().clone();
                    publish_json(publisher.as_ref(), topics::LOGGERD_STATUS, &current).await;
                }
            }
        }
    })
}

/// Connect and record until `shutdown` fires
pub async fn run(bus: Arc<dyn Bus>, config: LoggerConfig, shutdown: CancellationToken) -> Result<()> {
    Loggerd::connect(bus.as_ref(), config).await?.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::log::{LogReader, list_sessions};
    use std::time::Duration;

    fn config(root: &std::path::Path) -> LoggerConfig {
        LoggerConfig {
            log_root: root.to_path_buf(),
            status_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    async fn send(bus: &LocalBus, topic: &'static [u8], payload: &'static [u8]) {
        bus.local_publisher()
            .send(BusMessage::new(topic, payload))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_records_between_triggers() {
        let root = tempfile::tempdir().unwrap();
        let bus = LocalBus::default();
        let loggerd = Loggerd::connect(&bus, config(root.path())).await.unwrap();
        let mut status = loggerd.status();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(loggerd.run(shutdown.clone()));

        send(&bus, b"/before/", b"dropped").await;
        send(&bus, topics::LOGGERD_START, b"").await;
        status.wait_for(|s| s.recording).await.unwrap();
        send(&bus, b"/a/", b"1").await;
        send(&bus, b"/a/", b"2").await;
        send(&bus, topics::LOGGERD_STOP, b"").await;
        send(&bus, b"/after/", b"dropped").await;
        status.wait_for(|s| !s.recording).await.unwrap();

        shutdown.cancel();
        task.await.unwrap().unwrap();

        let sessions = list_sessions(root.path()).unwrap();
        assert_eq!(sessions.logs.len(), 1);
        let reader = LogReader::open(root.path().join(&sessions.logs[0].id), "pvrlog").unwrap();
        let topics: Vec<_> = reader.map(|e| e.unwrap().topic).collect();
        assert_eq!(
            topics,
            vec![
                bytes::Bytes::from_static(b"/a/"),
                bytes::Bytes::from_static(b"/a/"),
                bytes::Bytes::from_static(topics::LOGGERD_STOP),
            ]
        );
    }

    #[tokio::test]
    async fn test_unwritable_root_reports_exception() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let bus = LocalBus::default();
        let mut exceptions = bus.local_subscriber().await;
        exceptions.subscribe(topics::SERVER_EXCEPTION).await.unwrap();
        let loggerd = Loggerd::connect(&bus, config(&blocker)).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(loggerd.run(shutdown.clone()));

        send(&bus, topics::LOGGERD_START, b"").await;
        let message = exceptions.recv().await.unwrap();
        let status: crate::messages::StatusResponse =
            crate::messages::decode(&message.topic, &message.payload).unwrap();
        assert_eq!(status.code, 500);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
