//! Liveness beacon for daemons started by the supervisor

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::publish_json;
use crate::bus::Bus;
use crate::messages::Heartbeat;
use crate::topics;

/// Set by the supervisor to the name a child is registered under
pub const PROCESS_NAME_ENV: &str = "PVRBUS_PROCESS_NAME";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Publish heartbeats once per second when running under the supervisor
///
/// Returns `None` when [`PROCESS_NAME_ENV`] is unset.
pub fn spawn_heartbeat(bus: Arc<dyn Bus>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let name = std::env::var(PROCESS_NAME_ENV).ok()?;
    Some(tokio::spawn(run_heartbeat(bus, name, HEARTBEAT_INTERVAL, shutdown)))
}

async fn run_heartbeat(bus: Arc<dyn Bus>, name: String, every: Duration, shutdown: CancellationToken) {
    let publisher = match bus.publisher().await {
        Ok(publisher) => publisher,
        Err(e) => {
            warn!(error = %e, "heartbeat publisher unavailable");
            return;
        }
    };
    debug!(%name, "heartbeat started");

    let beat = Heartbeat { name };
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => publish_json(publisher.as_ref(), topics::HEARTBEAT, &beat).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Subscriber};
    use crate::messages;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_carry_the_name() {
        let bus = LocalBus::default();
        let mut sub = bus.local_subscriber().await;
        sub.subscribe(topics::HEARTBEAT).await.unwrap();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_heartbeat(
            Arc::new(bus.clone()),
            "timed".to_string(),
            Duration::from_millis(100),
            shutdown.clone(),
        ));

        for _ in 0..3 {
            let message = sub.recv().await.unwrap();
            let beat: Heartbeat = messages::decode(&message.topic, &message.payload).unwrap();
            assert_eq!(beat.name, "timed");
        }
        shutdown.cancel();
        task.await.unwrap();
    }
}
