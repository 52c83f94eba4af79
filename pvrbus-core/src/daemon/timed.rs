//! Clock daemon: publishes wall-clock time on `/mp/time/`

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::publish_json;
use crate::bus::Bus;
use crate::error::Result;
use crate::log::wall_clock_secs;
use crate::messages::TimeMessage;
use crate::topics;

/// Publishing period of the clock
pub const TICK: Duration = Duration::from_secs(1);

/// Publish a [`TimeMessage`] every `every` until `shutdown` fires
pub async fn run_every(bus: Arc<dyn Bus>, every: Duration, shutdown: CancellationToken) -> Result<()> {
    let publisher = bus.publisher().await?;
    let mut ticker = tokio::time::interval(every);
    info!(period = ?every, "clock started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let now = TimeMessage { millis: wall_clock_secs() * 1000.0 };
                publish_json(publisher.as_ref(), topics::TIME, &now).await;
            }
        }
    }
    info!("clock stopped");
    Ok(())
}

/// Publish once per second until `shutdown` fires
pub async fn run(bus: Arc<dyn Bus>, shutdown: CancellationToken) -> Result<()> {
    run_every(bus, TICK, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Subscriber};
    use crate::messages;

    #[tokio::test]
    async fn test_publishes_current_time() {
        let bus = LocalBus::default();
        let mut sub = bus.local_subscriber().await;
        sub.subscribe(topics::TIME).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_every(
            Arc::new(bus.clone()),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        let before = wall_clock_secs() * 1000.0;
        let message = sub.recv().await.unwrap();
        let time: TimeMessage = messages::decode(&message.topic, &message.payload).unwrap();
        assert!(time.millis + 1000.0 >= before);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
