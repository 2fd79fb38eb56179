//! # `drain_manager`
//!
//! Drain and shutdown coordination for the listeners of a proxy process that is
//! being taken out of service, e.g. during a hot restart or a rolling deploy.
//!
//! A [`DrainManager`] is bound to a single listener. It provides:
//!
//! - A probabilistic answer to "should this connection be closed now?"
//!   ([`DrainDecision::drain_close`]). Once a drain sequence starts, the probability
//!   of closing rises linearly from 0 to 1 over the drain window.
//! - A drain sequence ([`DrainManager::start_drain_sequence`]) that opens the window
//!   and notifies you once it has elapsed.
//! - A parent shutdown sequence ([`DrainManager::start_parent_shutdown_sequence`]) that
//!   terminates the process after a grace period, whether or not draining has completed.
//! - A connection watermark ([`DrainManager::set_connection_drain_percentage`]) that caps
//!   the number of connections allowed to stay open.
//!
//! The decision methods are lock-free: they can be called on every request from
//! any number of threads.
//!
//! The manager doesn't own a clock. Time and timers are provided by a [`Dispatcher`];
//! use [`TokioDispatcher`] if you're running on Tokio.
pub mod config;
mod decision;
mod host;
mod manager;
mod sequence;
mod shutdown;
pub mod timer;
mod watermark;

pub use decision::{DrainDecision, close_probability};
pub use host::HostProcess;
pub use manager::{DrainControl, DrainManager};
pub use sequence::DrainPhase;
pub use shutdown::ShutdownPhase;
pub use timer::{Dispatcher, TimerHandle, TokioDispatcher};
pub use watermark::{DrainPercentage, InvalidDrainPercentage};
