//! The clock and timer facility used to drive drain and shutdown sequences.
//!
//! [`Dispatcher`] is the seam between the coordinator and the event loop that
//! owns time. [`TokioDispatcher`] is the implementation you'll want in
//! production: it schedules callbacks on a Tokio runtime and reads time from
//! [`tokio::time::Instant`], which means tests can mock the clock using
//! Tokio's paused time.
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

pub use tokio_dispatcher::TokioDispatcher;

mod tokio_dispatcher;

/// A callback fired once, when a one-shot timer expires.
pub type OnceCallback = Box<dyn FnOnce() + Send + 'static>;

/// A callback fired on every tick of a repeating timer.
///
/// Returning [`ControlFlow::Break`] stops the timer: no further ticks will be
/// delivered and the associated [`TimerHandle`] is marked as cancelled.
pub type RepeatingCallback = Box<dyn FnMut() -> ControlFlow<()> + Send + 'static>;

/// A source of monotonic time that can schedule deferred callbacks.
///
/// Implementations must deliver each scheduled callback at least once, no earlier
/// than the requested delay, unless the timer is cancelled first.
pub trait Dispatcher: Send + Sync + 'static {
    /// The current monotonic time.
    fn now(&self) -> Instant;

    /// Invoke `callback` once, after `delay` has elapsed.
    fn schedule_once(&self, delay: Duration, callback: OnceCallback) -> TimerHandle;

    /// Invoke `callback` every `interval`, starting one `interval` from now,
    /// until it returns [`ControlFlow::Break`] or the timer is cancelled.
    fn schedule_repeating(&self, interval: Duration, callback: RepeatingCallback)
    -> TimerHandle;
}

#[derive(Debug, Clone, Default)]
/// A handle to a scheduled timer.
///
/// Handles are cheap to clone: all clones refer to the same timer.
/// Dropping a handle does **not** cancel the timer, use [`TimerHandle::cancel`].
pub struct TimerHandle(Arc<TimerState>);

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl TimerHandle {
    /// Create a handle for a timer that hasn't been cancelled yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the timer.
    ///
    /// Callbacks that haven't started yet will never run.
    /// Cancelling an already cancelled timer is a no-op.
    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::AcqRel) {
            self.0.notify.notify_waiters();
        }
    }

    /// Returns `true` if the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the timer is cancelled.
    pub async fn cancelled(&self) {
        // The `Notified` future must exist before we check the flag,
        // otherwise we could miss a `notify_waiters` call in between.
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
