use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::{DrainConfig, DrainStrategy, DrainType, errors::InvalidDrainConfig};
use crate::decision::{self, DrainDecision};
use crate::host::HostProcess;
use crate::sequence::{DrainPhase, DrainSequence};
use crate::shutdown::{ParentShutdown, ShutdownPhase};
use crate::timer::{Dispatcher, OnceCallback};
use crate::watermark::{ConnectionWatermark, DrainPercentage, InvalidDrainPercentage};

/// The operator-facing surface of a drain manager.
///
/// It drives the drain and parent shutdown sequences and sets the connection watermark.
/// Connection-handling code should only ever need [`DrainDecision`].
pub trait DrainControl: Send + Sync {
    /// Start draining. `on_complete` is invoked once the drain window has elapsed.
    ///
    /// If a drain sequence is already in progress, the call is a no-op:
    /// the deadline is left unchanged and `on_complete` is dropped.
    fn start_drain_sequence(&self, on_complete: OnceCallback);

    /// Start the countdown to the termination of the parent process.
    ///
    /// Calling it more than once doesn't arm additional timers.
    fn start_parent_shutdown_sequence(&self);

    /// Set the connection drain watermark as a percentage of the host's connection ceiling.
    ///
    /// Returns `false`, leaving the current watermark untouched, if `percentage` is above 100.
    fn set_connection_drain_percentage(&self, percentage: u16) -> bool;
}

#[derive(Clone)]
/// Coordinate draining and parent shutdown for a single listener.
///
/// A [`DrainManager`] is cheap to clone: all clones share the same state.
/// Hand out clones to connection-handling code (through [`DrainDecision`]) and
/// keep one for the operator path (through [`DrainControl`] or the inherent methods).
///
/// When the last clone is dropped, any armed timer is cancelled.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use drain_manager::{DrainDecision, DrainManager, HostProcess, TokioDispatcher};
/// use drain_manager::config::DrainConfig;
///
/// struct Host;
///
/// impl HostProcess for Host {
///     fn terminate(&self) -> Result<(), anyhow::Error> {
///         std::process::exit(0)
///     }
///
///     fn connection_ceiling(&self) -> u64 {
///         10_000
///     }
/// }
///
/// # async fn t() -> anyhow::Result<()> {
/// let manager = DrainManager::new(
///     DrainConfig::default(),
///     Arc::new(TokioDispatcher::current()?),
///     Arc::new(Host),
/// )?;
///
/// manager.start_parent_shutdown_sequence();
/// manager.start_drain_sequence(|| tracing::info!("Listener drained"));
///
/// // On the connection-handling path:
/// if manager.drain_close() {
///     // Close the connection.
/// }
/// # Ok(())
/// # }
/// ```
pub struct DrainManager {
    inner: Arc<Inner>,
}

struct Inner {
    drain_type: DrainType,
    drain_strategy: DrainStrategy,
    dispatcher: Arc<dyn Dispatcher>,
    host: Arc<dyn HostProcess>,
    sequence: Arc<DrainSequence>,
    parent_shutdown: ParentShutdown,
    watermark: ConnectionWatermark,
}

impl std::fmt::Debug for DrainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainManager")
            .field("drain_type", &self.inner.drain_type)
            .field("drain_strategy", &self.inner.drain_strategy)
            .field("phase", &self.phase())
            .field("parent_shutdown_phase", &self.parent_shutdown_phase())
            .field("drain_connections_limit", &self.inner.watermark.limit())
            .finish_non_exhaustive()
    }
}

impl DrainManager {
    /// Build a new drain manager for a listener.
    ///
    /// If `config` carries a connection drain percentage, the corresponding watermark
    /// is applied right away.
    /// It fails if `config` is rejected by [`DrainConfig::validate`].
    pub fn new(
        config: DrainConfig,
        dispatcher: Arc<dyn Dispatcher>,
        host: Arc<dyn HostProcess>,
    ) -> Result<Self, InvalidDrainConfig> {
        config.validate()?;
        let epoch = dispatcher.now();
        let inner = Inner {
            drain_type: config.drain_type,
            drain_strategy: config.drain_strategy,
            sequence: Arc::new(DrainSequence::new(
                epoch,
                config.drain_time,
                config.tick_interval,
            )),
            parent_shutdown: ParentShutdown::new(config.parent_shutdown_time),
            watermark: ConnectionWatermark::default(),
            dispatcher,
            host,
        };
        let manager = Self {
            inner: Arc::new(inner),
        };
        if let Some(percentage) = config.connection_drain_percentage {
            manager.apply_connection_drain_percentage(percentage);
        }
        Ok(manager)
    }

    /// Start draining the listener.
    ///
    /// It opens a drain window of [`DrainConfig::drain_time`] and checks, every
    /// [`DrainConfig::tick_interval`], whether it has elapsed.
    /// `on_complete` is invoked exactly once, no earlier than the drain deadline.
    ///
    /// Starting a drain sequence that is already in progress is a no-op: the deadline
    /// is not pushed back and `on_complete` is dropped without being invoked.
    #[tracing::instrument(name = "Start drain sequence", level = tracing::Level::INFO, skip_all)]
    pub fn start_drain_sequence<F>(&self, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        if inner
            .sequence
            .start(&inner.dispatcher, Box::new(on_complete))
        {
            tracing::info!(
                drain.time = ?inner.sequence.window(),
                drain.drain_type = ?inner.drain_type,
                drain.strategy = ?inner.drain_strategy,
                "Drain sequence started"
            );
        } else {
            tracing::debug!("A drain sequence is already in progress, ignoring the request");
        }
    }

    /// Arm the parent shutdown timer.
    ///
    /// Once [`DrainConfig::parent_shutdown_time`] has elapsed, the host is asked to
    /// terminate, whether or not draining has completed.
    /// The sequence is independent of the drain sequence: it can be started before,
    /// after or without it.
    #[tracing::instrument(name = "Start parent shutdown sequence", level = tracing::Level::INFO, skip_all)]
    pub fn start_parent_shutdown_sequence(&self) {
        let inner = &self.inner;
        if inner
            .parent_shutdown
            .start(inner.dispatcher.as_ref(), Arc::clone(&inner.host))
        {
            tracing::info!(
                shutdown.grace_period = ?inner.parent_shutdown.grace_period(),
                "Parent shutdown sequence started"
            );
        } else {
            tracing::warn!(
                "The parent shutdown sequence has already been started, ignoring the request"
            );
        }
    }

    /// Set the connection drain watermark, as a percentage of the host's connection ceiling.
    ///
    /// Returns `false` if `percentage` is above 100. The previous watermark is kept.
    pub fn set_connection_drain_percentage(&self, percentage: u16) -> bool {
        self.try_set_connection_drain_percentage(percentage).is_ok()
    }

    /// Set the connection drain watermark, as a percentage of the host's connection ceiling.
    ///
    /// On success, it returns the new absolute limit.
    /// It fails if `percentage` is above 100, leaving the previous watermark untouched.
    pub fn try_set_connection_drain_percentage(
        &self,
        percentage: u16,
    ) -> Result<u64, InvalidDrainPercentage> {
        match DrainPercentage::new(percentage) {
            Ok(percentage) => Ok(self.apply_connection_drain_percentage(percentage)),
            Err(e) => {
                tracing::warn!(
                    drain.connections.percentage = percentage,
                    "Rejected an invalid connection drain percentage"
                );
                Err(e)
            }
        }
    }

    fn apply_connection_drain_percentage(&self, percentage: DrainPercentage) -> u64 {
        let ceiling = self.inner.host.connection_ceiling();
        let limit = self.inner.watermark.set(percentage, ceiling);
        tracing::info!(
            drain.connections.percentage = percentage.inner(),
            drain.connections.ceiling = ceiling,
            drain.connections.limit = limit,
            "Connection drain watermark updated"
        );
        limit
    }

    /// The probability that [`drain_close`](DrainDecision::drain_close) returns `true`
    /// right now.
    pub fn close_probability(&self) -> f64 {
        let inner = &self.inner;
        if inner.drain_type == DrainType::ModifyOnly {
            return 0.0;
        }
        let Some(remaining) = inner.sequence.remaining(inner.dispatcher.now()) else {
            return 0.0;
        };
        if remaining.is_zero() {
            return 1.0;
        }
        match inner.drain_strategy {
            DrainStrategy::Immediate => 1.0,
            DrainStrategy::Gradual => {
                decision::close_probability(remaining, inner.sequence.window())
            }
        }
    }

    /// The current state of the drain sequence.
    pub fn phase(&self) -> DrainPhase {
        self.inner.sequence.phase()
    }

    /// Get notified of drain phase transitions.
    ///
    /// ```rust,no_run
    /// # async fn t(manager: drain_manager::DrainManager) {
    /// use drain_manager::DrainPhase;
    ///
    /// let mut phase = manager.subscribe();
    /// let _ = phase.wait_for(|p| *p == DrainPhase::Complete).await;
    /// # }
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<DrainPhase> {
        self.inner.sequence.subscribe()
    }

    /// The instant at which the drain window closes, if draining has started.
    pub fn drain_deadline(&self) -> Option<Instant> {
        self.inner.sequence.deadline()
    }

    /// The length of the drain window.
    pub fn drain_time(&self) -> Duration {
        self.inner.sequence.window()
    }

    /// The current state of the parent shutdown sequence.
    pub fn parent_shutdown_phase(&self) -> ShutdownPhase {
        self.inner.parent_shutdown.phase()
    }

    /// The instant at which the parent process will be terminated, if the
    /// parent shutdown sequence has started.
    pub fn parent_shutdown_deadline(&self) -> Option<Instant> {
        self.inner.parent_shutdown.deadline()
    }

    /// The connection drain percentage that produced the current watermark.
    pub fn connection_drain_percentage(&self) -> u16 {
        self.inner.watermark.percentage()
    }
}

impl DrainDecision for DrainManager {
    fn drain_close(&self) -> bool {
        decision::sample(self.close_probability())
    }

    fn draining(&self) -> bool {
        self.inner.sequence.is_draining()
    }

    fn draining_connections(&self) -> bool {
        self.inner.watermark.is_active()
    }

    fn drain_connections_limit(&self) -> u64 {
        self.inner.watermark.limit()
    }
}

impl DrainControl for DrainManager {
    fn start_drain_sequence(&self, on_complete: OnceCallback) {
        DrainManager::start_drain_sequence(self, on_complete)
    }

    fn start_parent_shutdown_sequence(&self) {
        DrainManager::start_parent_shutdown_sequence(self)
    }

    fn set_connection_drain_percentage(&self, percentage: u16) -> bool {
        DrainManager::set_connection_drain_percentage(self, percentage)
    }
}
