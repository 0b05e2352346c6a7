//! Time source for the engine
//!
//! Every invocation snapshots "now" once from a [`Clock`]; timers, signal
//! cut-offs and log timestamps all derive from it. Tests drive time with
//! [`ManualClock`] instead of sleeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Create a clock frozen at the current wall time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = after(*now, by);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Convert a chrono span to a std duration, clamping negatives to zero
pub(crate) fn until(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// Add a std duration to an instant, saturating at the far future
pub(crate) fn after(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| from.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let start = clock.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(other.now() - start, chrono::Duration::seconds(30));
    }

    #[test]
    fn test_until_clamps_to_zero() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(5);

        assert_eq!(until(now, earlier), Duration::ZERO);
        assert_eq!(until(earlier, now), Duration::from_secs(5));
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();

        assert_eq!(after(now, Duration::from_secs(1)), now + chrono::Duration::seconds(1));
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
