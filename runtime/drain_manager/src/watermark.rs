//! The connection-count axis of drain pressure.
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
/// A percentage between 0 and 100, used to derive a connection drain watermark
/// from the host's connection ceiling.
///
/// `0` disables connection-count draining.
pub struct DrainPercentage(u16);

impl DrainPercentage {
    /// The largest valid percentage.
    pub const MAX: u16 = 100;

    pub fn new(value: u16) -> Result<Self, InvalidDrainPercentage> {
        if value > Self::MAX {
            Err(InvalidDrainPercentage(value))
        } else {
            Ok(Self(value))
        }
    }

    pub fn inner(self) -> u16 {
        self.0
    }

    /// The absolute connection limit this percentage yields for the given ceiling.
    ///
    /// The result is rounded down.
    pub fn limit_for(self, ceiling: u64) -> u64 {
        let limit = u128::from(ceiling) * u128::from(self.0) / u128::from(Self::MAX);
        // `limit <= ceiling`, so the conversion can't actually fail.
        u64::try_from(limit).unwrap_or(ceiling)
    }
}

impl<'de> serde::Deserialize<'de> for DrainPercentage {
    fn deserialize<D>(deserializer: D) -> Result<DrainPercentage, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u16::deserialize(deserializer)?;
        DrainPercentage::new(value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<u16> for DrainPercentage {
    type Error = InvalidDrainPercentage;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Error raised when trying to create a [`DrainPercentage`] with an out-of-range value.
pub struct InvalidDrainPercentage(u16);

impl InvalidDrainPercentage {
    /// The rejected value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for InvalidDrainPercentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "The connection drain percentage must be between 0 and {}, got {}",
            DrainPercentage::MAX,
            self.0
        )
    }
}

impl std::error::Error for InvalidDrainPercentage {}

#[derive(Debug, Default)]
/// The current connection drain watermark.
///
/// There is at most one writer at a time, while any number of readers
/// may look at the limit concurrently.
/// `limit` is authoritative: `percentage` is kept for introspection only.
pub(crate) struct ConnectionWatermark {
    percentage: AtomicU16,
    limit: AtomicU64,
}

impl ConnectionWatermark {
    /// Derive a new limit from `percentage` and store it.
    /// It returns the new limit.
    pub(crate) fn set(&self, percentage: DrainPercentage, ceiling: u64) -> u64 {
        let limit = percentage.limit_for(ceiling);
        self.percentage.store(percentage.inner(), Ordering::Relaxed);
        self.limit.store(limit, Ordering::Release);
        limit
    }

    pub(crate) fn limit(&self) -> u64 {
        self.limit.load(Ordering::Acquire)
    }

    pub(crate) fn percentage(&self) -> u16 {
        self.percentage.load(Ordering::Relaxed)
    }

    /// `true` if a connection-count drain is in effect.
    pub(crate) fn is_active(&self) -> bool {
        self.limit() != 0
    }
}
