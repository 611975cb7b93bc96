//! Correlate Instance
//!
//! Durable records of tracked template executions.
//!
//! An instance moves through
//! `pending -> initializing -> executing -> finalizing -> completed`, or to
//! `error` from any non-terminal state. Every transition closes the open
//! status history entry and opens the next one.
//!
//! While an instance is non-terminal a [`HeartbeatManager`] task refreshes
//! its `lastHeartbeat`. [`InstanceTracker::reap_stale`] moves instances whose
//! heartbeat has gone quiet to `error`.

mod clock;
mod error;
mod heartbeat;
mod record;
mod status;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::InstanceError;
pub use heartbeat::HeartbeatManager;
pub use record::{ExecutionInstance, HeartbeatHealth, InstanceSummary, StatusEntry};
pub use status::InstanceStatus;
pub use tracker::{InstanceTracker, STALE_MESSAGE};
