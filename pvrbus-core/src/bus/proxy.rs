//! Forwarding proxy joining TCP publishers to TCP subscribers
//!
//! Publishers connect to the publish port and stream message frames;
//! subscribers connect to the subscribe port, send subscription frames and
//! receive every matching message. Fan-out goes through a [`LocalBus`], so
//! each subscriber gets its own high-water mark.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::BusError;
use super::frame;
use super::local::{LocalBus, LocalPublisher, LocalSubscriber};
use super::traits::{Publisher, Subscriber};

// Pause after a failed accept before taking the next connection.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Forwarding proxy
#[derive(Debug)]
pub struct BusProxy {
    pub_listener: TcpListener,
    sub_listener: TcpListener,
    bus: LocalBus,
}

impl BusProxy {
    /// Bind both listening sockets
    pub async fn bind(
        pub_addr: impl ToSocketAddrs,
        sub_addr: impl ToSocketAddrs,
        high_water_mark: usize,
    ) -> Result<Self, BusError> {
        Ok(Self {
            pub_listener: TcpListener::bind(pub_addr).await?,
            sub_listener: TcpListener::bind(sub_addr).await?,
            bus: LocalBus::new(high_water_mark),
        })
    }

    /// Bound publish address
    pub fn pub_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.pub_listener.local_addr()?)
    }

    /// Bound subscribe address
    pub fn sub_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.sub_listener.local_addr()?)
    }

    /// Forward until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BusError> {
        info!(
            pub_addr = ?self.pub_listener.local_addr().ok(),
            sub_addr = ?self.sub_listener.local_addr().ok(),
            "bus proxy listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.pub_listener.accept() => {
                    let Some((stream, peer)) = admit(accepted, "publish").await else {
                        continue;
                    };
                    debug!(%peer, "publisher connected");
                    tokio::spawn(forward_publisher(
                        stream,
                        self.bus.local_publisher(),
                        shutdown.child_token(),
                    ));
                }
                accepted = self.sub_listener.accept() => {
                    let Some((stream, peer)) = admit(accepted, "subscribe").await else {
                        continue;
                    };
                    debug!(%peer, "subscriber connected");
                    let subscriber = self.bus.local_subscriber().await;
                    tokio::spawn(serve_subscriber(stream, subscriber, shutdown.child_token()));
                }
            }
        }

        info!("bus proxy stopped");
        Ok(())
    }
}

async fn forward_publisher(stream: TcpStream, publisher: LocalPublisher, shutdown: CancellationToken) {
    let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else { break };
        let result = match frame {
            Ok(frame) => frame::decode_message(frame.freeze()),
            Err(e) => {
                warn!(error = %e, "publisher socket read failed");
                break;
            }
        };
        match result {
            Ok(message) => {
                if let Err(e) = publisher.send(message).await {
                    warn!(error = %e, "fan-out failed");
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed publisher frame"),
        }
    }
    debug!("publisher disconnected");
}

async fn serve_subscriber(stream: TcpStream, mut subscriber: LocalSubscriber, shutdown: CancellationToken) {
    let (read, write) = stream.into_split();
    let mut control = FramedRead::new(read, LengthDelimitedCodec::new());
    let mut sink = FramedWrite::new(write, LengthDelimitedCodec::new());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = control.next() => {
                let prefix = match frame {
                    Some(Ok(frame)) => frame::decode_subscription(frame.freeze()),
                    Some(Err(e)) => {
                        warn!(error = %e, "subscriber socket read failed");
                        break;
                    }
                    None => break,
                };
                match prefix {
                    Ok(prefix) => {
                        debug!(prefix = %crate::topics::display(&prefix), "subscription added");
                        // LocalSubscriber::subscribe never fails
                        let _ = subscriber.subscribe(&prefix).await;
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed subscription"),
                }
            }
            message = subscriber.recv() => {
                let Ok(message) = message else { break };
                let frame = match frame::encode_message(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "cannot forward message");
                        continue;
                    }
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("subscriber disconnected");
}

/// Failed accepts (descriptor exhaustion, aborted handshakes) are logged and
/// the listener keeps going
async fn admit(
    accepted: std::io::Result<(TcpStream, SocketAddr)>,
    listener: &str,
) -> Option<(TcpStream, SocketAddr)> {
    match accepted {
        Ok(connection) => Some(connection),
        Err(e) => {
            warn!(error = %e, listener, "accept failed");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}
