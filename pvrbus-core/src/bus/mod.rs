//! Topic-addressed publish/subscribe bus
//!
//! This module provides the bus abstraction every daemon talks through:
//! - [`Publisher`] / [`Subscriber`] / [`Bus`] traits (fire and forget, prefix filters)
//! - [`LocalBus`]: in-process fan-out with a bounded queue per subscriber
//! - [`TcpBus`] + [`BusProxy`]: the same semantics across processes through a forwarding proxy

mod error;
mod frame;
mod local;
mod message;
mod proxy;
mod tcp;
mod traits;

pub use error::BusError;
pub use local::{LocalBus, LocalPublisher, LocalSubscriber};
pub use message::BusMessage;
pub use proxy::BusProxy;
pub use tcp::{TcpBus, TcpPublisher, TcpSubscriber};
pub use traits::{Bus, BusBackend, Publisher, Subscriber};
