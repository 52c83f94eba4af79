//! TCP transport
//!
//! Daemons never talk to each other directly: publishers connect to the
//! proxy's publish port and subscribers to its subscribe port. [`TcpBus`] is
//! the per-daemon context object owning the addressing; every socket it
//! opens is closed when its handle is dropped.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

use super::error::BusError;
use super::frame;
use super::message::BusMessage;
use super::traits::{Bus, BusBackend, Publisher, Subscriber};
use crate::config::BusConfig;
use crate::retry::with_retry;

/// Bus context for a daemon process
#[derive(Debug, Clone)]
pub struct TcpBus {
    config: BusConfig,
}

impl TcpBus {
    /// Create a context for the given addressing
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    /// Bus addressing in use
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    async fn connect(&self, addr: String) -> Result<TcpStream, BusError> {
        let stream = with_retry(&self.config.connect_retry, || {
            let addr = addr.clone();
            async move {
                TcpStream::connect(&addr)
                    .await
                    .map_err(|source| BusError::Connect { addr, source })
            }
        })
        .await?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to bus");
        Ok(stream)
    }

    /// Connect a publisher to the proxy
    pub async fn connect_publisher(&self) -> Result<TcpPublisher, BusError> {
        let stream = self.connect(self.config.pub_addr()).await?;
        let (_, write) = stream.into_split();
        Ok(TcpPublisher {
            sink: Mutex::new(FramedWrite::new(write, LengthDelimitedCodec::new())),
        })
    }

    /// Connect a subscriber to the proxy
    pub async fn connect_subscriber(&self) -> Result<TcpSubscriber, BusError> {
        let stream = self.connect(self.config.sub_addr()).await?;
        Ok(TcpSubscriber::from_stream(
            stream,
            self.config.high_water_mark,
        ))
    }
}

#[async_trait]
impl Bus for TcpBus {
    async fn publisher(&self) -> Result<Box<dyn Publisher>, BusError> {
        Ok(Box::new(self.connect_publisher().await?))
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, BusError> {
        Ok(Box::new(self.connect_subscriber().await?))
    }

    fn backend_type(&self) -> BusBackend {
        BusBackend::Tcp
    }
}

/// Publisher connected to the proxy
#[derive(Debug)]
pub struct TcpPublisher {
    sink: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
}

#[async_trait]
impl Publisher for TcpPublisher {
    async fn send(&self, message: BusMessage) -> Result<(), BusError> {
        let frame = frame::encode_message(&message)?;
        self.sink.lock().await.send(frame).await?;
        Ok(())
    }
}

/// Subscriber connected to the proxy
///
/// A background task moves frames off the socket into a queue of
/// `high_water_mark` messages; overflow is dropped.
#[derive(Debug)]
pub struct TcpSubscriber {
    control: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    rx: mpsc::Receiver<BusMessage>,
    reader: JoinHandle<()>,
}

impl TcpSubscriber {
    fn from_stream(stream: TcpStream, high_water_mark: usize) -> Self {
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        let reader = tokio::spawn(read_frames(read, tx));
        Self {
            control: FramedWrite::new(write, LengthDelimitedCodec::new()),
            rx,
            reader,
        }
    }
}

async fn read_frames(read: OwnedReadHalf, tx: mpsc::Sender<BusMessage>) {
    let mut frames = FramedRead::new(read, LengthDelimitedCodec::new());
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame.freeze(),
            Err(e) => {
                warn!(error = %e, "bus socket read failed");
                break;
            }
        };
        match frame::decode_message(frame) {
            Ok(message) => match tx.try_send(message) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            },
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }
}

impl Drop for TcpSubscriber {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Subscriber for TcpSubscriber {
    async fn subscribe(&mut self, prefix: &[u8]) -> Result<(), BusError> {
        self.control
            .send(frame::encode_subscription(prefix))
            .await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<BusMessage, BusError> {
        self.rx.recv().await.ok_or(BusError::Closed)
    }

    fn try_recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Closed),
        }
    }
}
