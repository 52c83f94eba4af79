//! Time-synchronized replay of recorded sessions
//!
//! A [`ReplayScheduler`] owns the cursor over one loaded session and emits
//! its entries onto the bus so that the gaps between sends match the gaps
//! between receipts at recording time. It is driven by [`ReplayCommand`]s
//! arriving over a channel, so scrubbing never interleaves with a send.
//!
//! ```text
//! Idle --load--> Loaded --play--> Playing <--play/pause--> Paused
//!   ^                                 |
//!   +------------- unload ------------+
//! ```

mod error;
mod scheduler;

pub use error::ReplayError;
pub use scheduler::{ReplayCommand, ReplayScheduler, ReplayState};
