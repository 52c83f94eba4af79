//! Core bus trait definitions

use async_trait::async_trait;
use std::fmt::Debug;

use super::error::BusError;
use super::message::BusMessage;

/// Sending half of a bus connection
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    /// Publish a message; delivery is fire and forget
    async fn send(&self, message: BusMessage) -> Result<(), BusError>;
}

/// Receiving half of a bus connection
#[async_trait]
pub trait Subscriber: Send + Debug {
    /// Add a topic prefix filter (empty prefix = every topic)
    async fn subscribe(&mut self, prefix: &[u8]) -> Result<(), BusError>;

    /// Wait for the next message
    async fn recv(&mut self) -> Result<BusMessage, BusError>;

    /// Take the next message if one is queued, without waiting
    ///
    /// `Ok(None)` means the receive would block. That is loop control, not an error.
    fn try_recv(&mut self) -> Result<Option<BusMessage>, BusError>;
}

/// Factory for publishers and subscribers, owned by each daemon
#[async_trait]
pub trait Bus: Send + Sync + Debug {
    /// Open a publisher
    async fn publisher(&self) -> Result<Box<dyn Publisher>, BusError>;

    /// Open a subscriber with no filters
    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, BusError>;

    /// Get backend type for debugging/monitoring
    fn backend_type(&self) -> BusBackend;

    /// Open a subscriber filtered on the given prefixes
    async fn subscriber_for(&self, prefixes: &[&[u8]]) -> Result<Box<dyn Subscriber>, BusError> {
        let mut subscriber = self.subscriber().await?;
        for prefix in prefixes {
            subscriber.subscribe(prefix).await?;
        }
        Ok(subscriber)
    }
}

/// Backend type for monitoring/debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// In-process channels
    Local,
    /// TCP sockets through the forwarding proxy
    Tcp,
}
