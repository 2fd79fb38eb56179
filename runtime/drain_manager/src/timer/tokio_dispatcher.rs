use std::time::{Duration, Instant};

use tokio::runtime::{Handle, TryCurrentError};
use tokio::time::MissedTickBehavior;

use super::{Dispatcher, OnceCallback, RepeatingCallback, TimerHandle};

/// Tokio panics on a zero-length interval.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
/// A [`Dispatcher`] backed by a Tokio runtime.
///
/// Each timer is a lightweight task spawned on the runtime.
/// Time is read from [`tokio::time::Instant`], therefore pausing or advancing
/// time in tests (see [`tokio::time::pause`]) is reflected in
/// [`Dispatcher::now`].
pub struct TokioDispatcher {
    runtime: Handle,
}

impl TokioDispatcher {
    /// Schedule timers on the runtime behind `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Schedule timers on the runtime we are currently running on.
    ///
    /// It fails if called outside of a Tokio runtime context.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Dispatcher for TokioDispatcher {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule_once(&self, delay: Duration, callback: OnceCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !timer.is_cancelled() {
                        callback();
                    }
                }
            }
        });
        handle
    }

    fn schedule_repeating(
        &self,
        interval: Duration,
        mut callback: RepeatingCallback,
    ) -> TimerHandle {
        let period = interval.max(MIN_TICK_INTERVAL);
        let handle = TimerHandle::new();
        let timer = handle.clone();
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            // A late tick must not be followed by a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = timer.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if timer.is_cancelled() {
                    return;
                }
                if callback().is_break() {
                    timer.cancel();
                    return;
                }
            }
        });
        handle
    }
}
