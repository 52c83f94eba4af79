//! pvrbus Supervisor - keeps the bus daemons alive
//!
//! A fixed process table is started once and then checked on every tick:
//! - Children that exited are restarted, with exponential backoff when they
//!   keep dying right after start
//! - Children with a watchdog are killed and restarted when their
//!   heartbeats on `/manager/heartbeat/` stop
//! - Shutdown sends SIGTERM to everyone, then waits and kills stragglers
//!
//! ```rust,no_run
//! use pvrbus_supervisor::{ProcessSupervisor, SupervisorConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> pvrbus_supervisor::Result<()> {
//! let supervisor = ProcessSupervisor::new(SupervisorConfig::load()?)?;
//! let (_beats, heartbeats) = mpsc::channel(64);
//! supervisor
//!     .run(pvrbus_core::signals::wait_for_shutdown_signal(), heartbeats)
//!     .await
//! # }
//! ```

mod config;
mod error;
mod heartbeat;
mod process;
mod supervisor;

pub use config::{ProcessSpec, SupervisorConfig, default_table};
pub use error::{Result, SupervisorError};
pub use heartbeat::forward_heartbeats;
pub use process::ManagedProcess;
pub use supervisor::ProcessSupervisor;
