//! The decision surface consulted by connection-handling code.
use std::time::Duration;

use rand::Rng;

/// Answer, from the connection-handling hot path, whether a connection should be closed
/// because the process is draining.
///
/// Every method is non-blocking: implementations must rely on atomic loads,
/// never on locks shared with the code that drives the drain sequence.
pub trait DrainDecision: Send + Sync {
    /// Returns `true` if the caller should close its connection now.
    ///
    /// While a drain sequence is in progress the answer is probabilistic, with a
    /// probability of `true` that grows as the drain deadline approaches.
    /// It is always `true` once the deadline has passed.
    fn drain_close(&self) -> bool;

    /// Returns `true` once a drain sequence has been started.
    fn draining(&self) -> bool;

    /// Returns `true` if a connection-count watermark is in effect.
    fn draining_connections(&self) -> bool;

    /// The current connection-count watermark.
    /// `0` means that no connection-count drain is in effect.
    fn drain_connections_limit(&self) -> u64;

    /// Combine both axes of drain pressure: elapsed drain time and open connections.
    ///
    /// Returns `true` if [`drain_close`](DrainDecision::drain_close) says so, or if
    /// `open_connections` is above the connection watermark.
    fn should_close_connection(&self, open_connections: u64) -> bool {
        if self.drain_close() {
            return true;
        }
        self.draining_connections() && open_connections > self.drain_connections_limit()
    }
}

/// The probability of closing a connection when `remaining` is left out of
/// a drain window of length `window`.
///
/// It is `0` at the start of the window, `1` once nothing is left, and
/// grows linearly in between.
pub fn close_probability(remaining: Duration, window: Duration) -> f64 {
    if remaining.is_zero() || window.is_zero() {
        return 1.0;
    }
    let left = remaining.as_secs_f64() / window.as_secs_f64();
    (1.0 - left).clamp(0.0, 1.0)
}

/// A single Bernoulli trial with success probability `p`.
///
/// Uses the thread-local generator, so concurrent callers never contend.
pub(crate) fn sample(p: f64) -> bool {
    if p <= 0.0 {
        return false;
    }
    if p >= 1.0 {
        return true;
    }
    rand::thread_rng().gen_bool(p)
}
