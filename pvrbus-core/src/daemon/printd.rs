//! Console daemon: logs the freshest message per topic once per cycle

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Bus;
use crate::error::Result;
use crate::freshest::drain_latest_timeout;
use crate::topics;

/// Cycle length
pub const PERIOD: Duration = Duration::from_secs(1);

/// Print until `shutdown` fires
pub async fn run(bus: Arc<dyn Bus>, max_skip: usize, shutdown: CancellationToken) -> Result<()> {
    let mut subscriber = bus.subscriber_for(&[b""]).await?;

    loop {
        let latest = tokio::select! {
            _ = shutdown.cancelled() => break,
            latest = drain_latest_timeout(subscriber.as_mut(), max_skip, PERIOD) => latest?,
        };
        match latest {
            Some(latest) => {
                for message in latest.iter() {
                    info!(
                        topic = %topics::display(&message.topic),
                        bytes = message.payload.len(),
                        "message"
                    );
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(PERIOD) => {}
                }
            }
            None => info!("no messages"),
        }
    }
    Ok(())
}
