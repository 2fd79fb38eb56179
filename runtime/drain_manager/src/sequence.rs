use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::timer::{Dispatcher, OnceCallback, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The lifecycle of a drain sequence.
///
/// Transitions only move forward: `Idle -> Draining -> Complete`.
pub enum DrainPhase {
    /// No drain sequence has been started.
    Idle,
    /// The drain window is open.
    Draining,
    /// The drain deadline has passed and the completion callback has been invoked.
    Complete,
}

/// The state of the drain sequence for a single listener.
///
/// Readers only ever perform atomic loads.
/// Writers (starting the sequence, the tick) are serialized via `tick_timer`.
pub(crate) struct DrainSequence {
    draining: AtomicBool,
    complete: AtomicBool,
    /// Nanoseconds between `epoch` and the drain deadline.
    /// Only meaningful once `draining` is `true`, immutable afterwards.
    deadline_nanos: AtomicU64,
    epoch: Instant,
    window: Duration,
    tick_interval: Duration,
    tick_timer: Mutex<Option<TimerHandle>>,
    phase: watch::Sender<DrainPhase>,
}

impl DrainSequence {
    pub(crate) fn new(epoch: Instant, window: Duration, tick_interval: Duration) -> Self {
        let (phase, _) = watch::channel(DrainPhase::Idle);
        Self {
            draining: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            deadline_nanos: AtomicU64::new(0),
            epoch,
            window,
            tick_interval,
            tick_timer: Mutex::new(None),
            phase,
        }
    }

    /// Open the drain window and arm the periodic tick.
    ///
    /// Returns `false`, leaving the deadline untouched, if the sequence had already been started.
    pub(crate) fn start(
        self: &Arc<Self>,
        dispatcher: &Arc<dyn Dispatcher>,
        on_complete: OnceCallback,
    ) -> bool {
        let mut tick_timer = self
            .tick_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.draining.load(Ordering::Acquire) {
            return false;
        }

        let deadline_offset = dispatcher
            .now()
            .saturating_duration_since(self.epoch)
            .saturating_add(self.window);
        self.deadline_nanos
            .store(saturating_nanos(deadline_offset), Ordering::Relaxed);
        // Publishing `draining` after the deadline guarantees that nobody observes
        // an in-progress sequence without its deadline.
        self.draining.store(true, Ordering::Release);
        self.phase.send_replace(DrainPhase::Draining);

        let sequence = Arc::downgrade(self);
        let clock = Arc::clone(dispatcher);
        let mut on_complete = Some(on_complete);
        let handle = dispatcher.schedule_repeating(
            self.tick_interval,
            Box::new(move || {
                let Some(sequence) = sequence.upgrade() else {
                    return ControlFlow::Break(());
                };
                let elapsed = clock.now().saturating_duration_since(sequence.epoch);
                if elapsed < sequence.deadline_offset() {
                    return ControlFlow::Continue(());
                }
                sequence.complete(on_complete.take());
                ControlFlow::Break(())
            }),
        );
        *tick_timer = Some(handle);
        true
    }

    /// Only ever invoked by the tick, which stops right after.
    fn complete(&self, on_complete: Option<OnceCallback>) {
        if self.complete.load(Ordering::Acquire) {
            return;
        }
        // Observers of `Complete` can rely on the callback having returned.
        if let Some(on_complete) = on_complete {
            on_complete();
        }
        self.complete.store(true, Ordering::Release);
        tracing::info!("Drain sequence complete");
        self.phase.send_replace(DrainPhase::Complete);
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// The drain deadline, if a drain sequence has been started.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if !self.is_draining() {
            return None;
        }
        self.epoch.checked_add(self.deadline_offset())
    }

    /// How much of the drain window is left at `now`, if a drain sequence has been started.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        if !self.is_draining() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.epoch);
        Some(self.deadline_offset().saturating_sub(elapsed))
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn phase(&self) -> DrainPhase {
        if self.complete.load(Ordering::Acquire) {
            DrainPhase::Complete
        } else if self.is_draining() {
            DrainPhase::Draining
        } else {
            DrainPhase::Idle
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<DrainPhase> {
        self.phase.subscribe()
    }

    fn deadline_offset(&self) -> Duration {
        Duration::from_nanos(self.deadline_nanos.load(Ordering::Relaxed))
    }

}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Drop for DrainSequence {
    fn drop(&mut self) {
        let tick_timer = self
            .tick_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tick_timer.take() {
            handle.cancel();
        }
    }
}
