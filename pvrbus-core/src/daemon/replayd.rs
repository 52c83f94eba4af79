//! Replay daemon
//!
//! The command loop drains `/replayd/in/` freshest-wins, answers session
//! list requests itself and forwards every other request to the scheduler
//! task, which alone owns the replay cursor.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{publish_exception, publish_json};
use crate::bus::{Bus, BusMessage, Publisher, Subscriber};
use crate::config::ReplayConfig;
use crate::error::{PvrbusError, Result};
use crate::freshest::drain_latest;
use crate::log::list_sessions;
use crate::messages::{self, BoolValue, FloatValue, LoadLogRequest, LogList};
use crate::replay::{ReplayCommand, ReplayScheduler};
use crate::topics;

const COMMAND_QUEUE: usize = 64;

/// Parsed `/replayd/in/` request
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaydRequest {
    /// List recorded sessions
    List,
    /// Forward to the scheduler
    Command(ReplayCommand),
}

impl ReplaydRequest {
    /// Parse a message received on `/replayd/in/`
    pub fn parse(message: &BusMessage) -> Result<Self> {
        let topic = message.topic.as_ref();
        let payload = message.payload.as_ref();
        let command = match topic {
            t if t == topics::REPLAYD_LIST_REQUEST => return Ok(Self::List),
            t if t == topics::REPLAYD_LOAD => {
                ReplayCommand::Load(messages::decode::<LoadLogRequest>(t, payload)?)
            }
            t if t == topics::REPLAYD_LOOP => {
                ReplayCommand::SetLoop(messages::decode::<BoolValue>(t, payload)?.value)
            }
            t if t == topics::REPLAYD_START => ReplayCommand::Play,
            t if t == topics::REPLAYD_STOP => ReplayCommand::Pause,
            t if t == topics::REPLAYD_SCRUB => {
                ReplayCommand::Scrub(messages::decode::<FloatValue>(t, payload)?.value)
            }
            other => {
                return Err(PvrbusError::protocol(
                    400,
                    format!("unknown replay request {}", topics::display(other)),
                ));
            }
        };
        Ok(Self::Command(command))
    }
}

/// Session folders under `log_root`; a missing root lists nothing
pub fn session_list(log_root: &Path) -> Result<LogList> {
    match list_sessions(log_root) {
        Ok(list) => Ok(list),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LogList::default()),
        Err(e) => Err(e.into()),
    }
}

/// Replay daemon with its bus handles
#[derive(Debug)]
pub struct Replayd {
    config: ReplayConfig,
    subscriber: Box<dyn Subscriber>,
    publisher: Box<dyn Publisher>,
    scheduler_publisher: Box<dyn Publisher>,
}

impl Replayd {
    /// Connect to the bus and subscribe to the command topics
    pub async fn connect(bus: &dyn Bus, config: ReplayConfig) -> Result<Self> {
        Ok(Self {
            subscriber: bus.subscriber_for(&[topics::REPLAYD_IN]).await?,
            publisher: bus.publisher().await?,
            scheduler_publisher: bus.publisher().await?,
            config,
        })
    }

    /// Serve commands until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            mut subscriber,
            publisher,
            scheduler_publisher,
        } = self;

        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let scheduler = ReplayScheduler::new(&config);
        let scheduler_task =
            tokio::spawn(scheduler.run(scheduler_publisher, rx, shutdown.child_token()));
        info!(log_root = %config.log_root.display(), "replayer ready");

        let result = loop {
            let latest = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                latest = drain_latest(subscriber.as_mut(), config.drain_batch) => latest,
            };
            let latest = match latest {
                Ok(latest) => latest,
                Err(e) => break Err(PvrbusError::from(e)),
            };
            for message in latest.iter() {
                if let Err(e) = handle(&config, publisher.as_ref(), message, &commands).await {
                    warn!(error = %e, topic = %topics::display(&message.topic), "replay request rejected");
                    publish_exception(publisher.as_ref(), e).await;
                }
            }
        };

        drop(commands);
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "replay scheduler task failed");
        }
        info!("replayer stopped");
        result
    }
}

async fn handle(
    config: &ReplayConfig,
    publisher: &dyn Publisher,
    message: &BusMessage,
    commands: &mpsc::Sender<ReplayCommand>,
) -> Result<()> {
    match ReplaydRequest::parse(message)? {
        ReplaydRequest::List => {
            let list = session_list(&config.log_root)?;
            debug!(sessions = list.logs.len(), "answering list request");
            publish_json(publisher, topics::REPLAYD_LIST, &list).await;
        }
        ReplaydRequest::Command(command) => {
            commands
                .send(command)
                .await
                .map_err(|_| PvrbusError::Other("replay scheduler stopped".to_string()))?;
        }
    }
    Ok(())
}

/// Connect and serve until `shutdown` fires
pub async fn run(bus: Arc<dyn Bus>, config: ReplayConfig, shutdown: CancellationToken) -> Result<()> {
    Replayd::connect(bus.as_ref(), config).await?.run(shutdown).await
}
