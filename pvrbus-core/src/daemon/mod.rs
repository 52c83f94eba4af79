//! Bus-facing daemons
//!
//! Each daemon is an async function taking the bus context, its
//! configuration and a [`CancellationToken`]; the CLI runs one per process.
//! Recoverable failures are published on `/server_exception/` and the loop
//! carries on.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod heartbeat;
pub mod loggerd;
pub mod printd;
pub mod proxyd;
pub mod replayd;
pub mod timed;

pub use heartbeat::{PROCESS_NAME_ENV, spawn_heartbeat};

use serde::Serialize;
use tracing::warn;

use crate::bus::{BusMessage, Publisher};
use crate::error::PvrbusError;
use crate::messages;
use crate::topics;

/// Publish a JSON payload, logging rather than returning failures
pub(crate) async fn publish_json<T: Serialize>(
    publisher: &dyn Publisher,
    topic: &'static [u8],
    value: &T,
) {
    let payload = match messages::encode(value) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, topic = %topics::display(topic), "failed to encode payload");
            return;
        }
    };
    if let Err(e) = publisher.send(BusMessage::new(topic, payload)).await {
        warn!(error = %e, topic = %topics::display(topic), "failed to publish");
    }
}

/// Report an error on `/server_exception/`
pub(crate) async fn publish_exception(publisher: &dyn Publisher, error: PvrbusError) {
    publish_json(publisher, topics::SERVER_EXCEPTION, &error.status_response()).await;
}
