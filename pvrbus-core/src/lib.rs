//! # pvrbus - bus substrate for the projection daemons
//!
//! The daemons of the X-ray simulation system never call each other: they
//! publish and subscribe on a topic-addressed bus. This crate holds the
//! pieces every one of them depends on:
//! - **Freshest-wins draining** so consumers never fall behind bursty senders
//! - **Sharded session logs** written by the recorder daemon
//! - **Time-synchronized replay** with seek, loop, scrub and pause
//! - The bus-facing daemons themselves (proxy, logger, replayer, clock, console)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pvrbus_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = LocalBus::default();
//!     let mut sub = bus.subscriber_for(&[b"/mp/"]).await?;
//!     bus.local_publisher()
//!         .send(BusMessage::new(&b"/mp/time/"[..], &b"{}"[..]))
//!         .await?;
//!
//!     let latest = drain_latest(sub.as_mut(), 1000).await?;
//!     assert_eq!(latest.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **bus**: transport traits, in-process bus, TCP transport and proxy
//! - **log**: entry codec, shard writer, session recorder and reader
//! - **replay**: the replay state machine and its pacing loop
//! - **daemon**: one async entry point per daemon
//! - **engine**: interface to the external projection engine

pub mod bus;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod freshest;
pub mod log;
pub mod messages;
pub mod replay;
pub mod retry;
pub mod signals;
pub mod topics;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{
        Bus, BusBackend, BusMessage, BusProxy, LocalBus, Publisher, Subscriber, TcpBus,
    };
    pub use crate::config::{BusConfig, LoggerConfig, PvrbusConfig, ReplayConfig};
    pub use crate::error::{PvrbusError, Result};
    pub use crate::freshest::{Latest, drain_all, drain_latest, drain_latest_timeout};
    pub use crate::log::{LogEntry, LogReader, LogRecorder, ShardLimits, ShardWriter};
    pub use crate::messages::{
        LoadLogRequest, LogList, LoggerStatus, ReplayerStatus, StatusResponse,
    };
    pub use crate::replay::{ReplayCommand, ReplayScheduler, ReplayState};
    pub use crate::retry::RetryConfig;
    pub use crate::signals::{shutdown_token, wait_for_shutdown_signal};
}
