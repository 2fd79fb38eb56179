use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing_log_error::log_error;

use crate::host::HostProcess;
use crate::timer::{Dispatcher, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The lifecycle of the parent shutdown sequence.
///
/// Transitions only move forward: `Unarmed -> Armed -> Terminated`.
pub enum ShutdownPhase {
    /// The parent shutdown sequence hasn't been started.
    Unarmed,
    /// The termination timer is armed.
    Armed,
    /// The grace period expired and the host was asked to terminate.
    Terminated,
}

/// A single deferred termination of the host process.
pub(crate) struct ParentShutdown {
    grace_period: Duration,
    armed: AtomicBool,
    terminated: Arc<AtomicBool>,
    timer: Mutex<Option<ArmedTimer>>,
}

struct ArmedTimer {
    handle: TimerHandle,
    /// `None` if the deadline can't be represented by the platform clock.
    deadline: Option<Instant>,
}

impl ParentShutdown {
    pub(crate) fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            armed: AtomicBool::new(false),
            terminated: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// Arm the termination timer.
    ///
    /// Returns `false` if the timer had already been armed: there is never more
    /// than one termination timer.
    pub(crate) fn start(&self, dispatcher: &dyn Dispatcher, host: Arc<dyn HostProcess>) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.armed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let grace_period = self.grace_period;
        let terminated = Arc::clone(&self.terminated);
        let deadline = dispatcher.now().checked_add(grace_period);
        let handle = dispatcher.schedule_once(
            grace_period,
            Box::new(move || {
                tracing::warn!(
                    shutdown.grace_period = ?grace_period,
                    "Shutting down the parent process: the grace period has expired"
                );
                if let Err(e) = host.terminate() {
                    log_error!(*e, "Failed to terminate the parent process");
                }
                terminated.store(true, Ordering::Release);
            }),
        );
        *timer = Some(ArmedTimer { handle, deadline });
        true
    }

    pub(crate) fn phase(&self) -> ShutdownPhase {
        if self.terminated.load(Ordering::Acquire) {
            ShutdownPhase::Terminated
        } else if self.armed.load(Ordering::Acquire) {
            ShutdownPhase::Armed
        } else {
            ShutdownPhase::Unarmed
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|t| t.deadline)
    }

    pub(crate) fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

impl Drop for ParentShutdown {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = timer.take() {
            timer.handle.cancel();
        }
    }
}
