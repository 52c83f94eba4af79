//! Bus heartbeats fed into the watchdog

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pvrbus_core::bus::{Bus, BusError, Subscriber};
use pvrbus_core::messages::{self, Heartbeat};
use pvrbus_core::retry::{Backoff, RetryConfig};
use pvrbus_core::topics;

/// Forward the names of heartbeating daemons to `names`
///
/// The proxy is itself a supervised child, so connection failures are
/// retried with backoff until `shutdown` fires or `names` is dropped.
pub async fn forward_heartbeats(
    bus: Arc<dyn Bus>,
    names: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::new(RetryConfig::restart());
    loop {
        let subscriber = tokio::select! {
            _ = shutdown.cancelled() => return,
            subscriber = bus.subscriber_for(&[topics::HEARTBEAT]) => subscriber,
        };
        match subscriber {
            Ok(mut subscriber) => {
                backoff.reset();
                debug!("listening for heartbeats");
                match relay(subscriber.as_mut(), &names, &shutdown).await {
                    Ok(()) => return,
                    Err(e) => debug!(error = %e, "heartbeat feed lost"),
                }
            }
            Err(e) => debug!(error = %e, failures = backoff.failures(), "heartbeat feed unavailable"),
        }

        let delay = backoff.fail();
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn relay(
    subscriber: &mut dyn Subscriber,
    names: &mpsc::Sender<String>,
    shutdown: &CancellationToken,
) -> Result<(), BusError> {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            message = subscriber.recv() => message?,
        };
        match messages::decode::<Heartbeat>(&message.topic, &message.payload) {
            Ok(beat) => {
                if names.send(beat.name).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "ignoring malformed heartbeat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvrbus_core::bus::{BusMessage, LocalBus, Publisher};

    #[tokio::test]
    async fn test_heartbeat_names_are_forwarded() {
        let bus = LocalBus::default();
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(forward_heartbeats(
            Arc::new(bus.clone()),
            tx,
            shutdown.clone(),
        ));

        let publisher = bus.local_publisher();
        let beat = messages::encode(&Heartbeat {
            name: "loggerd".to_string(),
        })
        .unwrap();
        let name = loop {
            publisher
                .send(BusMessage::new(topics::HEARTBEAT, beat.clone()))
                .await
                .unwrap();
            publisher
                .send(BusMessage::new(topics::HEARTBEAT, &b"garbage"[..]))
                .await
                .unwrap();
            tokio::select! {
                name = rx.recv() => break name,
                _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
            }
        };
        assert_eq!(name.as_deref(), Some("loggerd"));

        shutdown.cancel();
        task.await.unwrap();
    }
}
