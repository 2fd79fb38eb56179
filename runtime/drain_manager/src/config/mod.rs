//! Configuration for a [`DrainManager`](crate::DrainManager).
//!
//! [`DrainConfig`] is the key type in this module.
//! Use [`ConfigLoader`] to assemble it from configuration files and
//! environment variables.
use std::time::Duration;

use crate::watermark::DrainPercentage;

pub use loader::{ConfigLoader, errors};

mod loader;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how a listener drains and how long the parent process is allowed to live.
///
/// All fields have a default value: an empty configuration is valid.
///
/// # Example
///
/// ```yaml
/// drain_time: 5m
/// parent_shutdown_time: 7m 30s
/// drain_type: modify_only
/// connection_drain_percentage: 20
/// ```
pub struct DrainConfig {
    /// The length of the drain window.
    ///
    /// Over this window, the probability of [`drain_close`](crate::DrainDecision::drain_close)
    /// returning `true` rises from 0 to 1.
    ///
    /// # Default
    ///
    /// 10 minutes.
    #[serde(with = "humantime_serde", default = "default_drain_time")]
    pub drain_time: Duration,
    /// How long to wait, after the parent shutdown sequence starts,
    /// before terminating the parent process.
    ///
    /// The deadline is enforced whether or not draining has completed.
    ///
    /// # Default
    ///
    /// 15 minutes.
    #[serde(with = "humantime_serde", default = "default_parent_shutdown_time")]
    pub parent_shutdown_time: Duration,
    /// How often the drain sequence checks whether its deadline has passed.
    ///
    /// It must be greater than zero.
    ///
    /// # Default
    ///
    /// 1 second.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// The drain type configured on the listener.
    #[serde(default)]
    pub drain_type: DrainType,
    /// How connections are closed while the drain window is open.
    #[serde(default)]
    pub drain_strategy: DrainStrategy,
    /// The connection drain watermark to apply as soon as the manager is built,
    /// as a percentage of the host's connection ceiling.
    ///
    /// # Default
    ///
    /// `None`, i.e. no connection-count drain.
    #[serde(default)]
    pub connection_drain_percentage: Option<DrainPercentage>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            drain_time: default_drain_time(),
            parent_shutdown_time: default_parent_shutdown_time(),
            tick_interval: default_tick_interval(),
            drain_type: Default::default(),
            drain_strategy: Default::default(),
            connection_drain_percentage: None,
        }
    }
}

impl DrainConfig {
    /// The longest duration accepted for [`drain_time`](Self::drain_time),
    /// [`parent_shutdown_time`](Self::parent_shutdown_time) and
    /// [`tick_interval`](Self::tick_interval): 100 years.
    pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

    /// Check that the configuration can be used to build a [`DrainManager`](crate::DrainManager).
    ///
    /// It fails if `tick_interval` is zero or if any duration exceeds
    /// [`DrainConfig::MAX_DURATION`].
    pub fn validate(&self) -> Result<(), errors::InvalidDrainConfig> {
        if self.tick_interval.is_zero() {
            return Err(errors::InvalidDrainConfig::ZeroTickInterval);
        }
        for (field, value) in [
            ("drain_time", self.drain_time),
            ("parent_shutdown_time", self.parent_shutdown_time),
            ("tick_interval", self.tick_interval),
        ] {
            if value > Self::MAX_DURATION {
                return Err(errors::InvalidDrainConfig::DurationTooLong {
                    field,
                    max: Self::MAX_DURATION,
                });
            }
        }
        Ok(())
    }
}

fn default_drain_time() -> Duration {
    Duration::from_secs(60 * 10)
}

fn default_parent_shutdown_time() -> Duration {
    Duration::from_secs(60 * 15)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// The drain type configured on a listener.
pub enum DrainType {
    /// Connections are closed, with increasing likelihood, once the drain sequence starts.
    ///
    /// This is the default.
    #[default]
    Default,
    /// The listener is only drained when it's modified or removed.
    ///
    /// Time-based closing is disabled: [`drain_close`](crate::DrainDecision::drain_close)
    /// always returns `false`. The connection watermark still applies.
    ModifyOnly,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// How connections are closed while the drain window is open.
pub enum DrainStrategy {
    /// The probability of closing a connection grows linearly over the drain window,
    /// from 0 when the sequence starts to 1 at its deadline.
    ///
    /// This is the default.
    #[default]
    Gradual,
    /// Every connection is asked to close as soon as the drain sequence starts.
    Immediate,
}
