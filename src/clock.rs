//! Injectable time source.
//!
//! Staleness checks and the claim verification loop read time and sleep
//! only through [`Clock`], so tests can run the two-minute verification
//! window against a [`ManualClock`] without real delay.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Wall-clock time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_epoch_ms(&self) -> i64;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time: `chrono` for the wall clock, `tokio` for sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time that only moves when told to.
///
/// [`sleep`](Clock::sleep) returns immediately after advancing the clock by
/// the requested duration, and every requested sleep is recorded.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use docqueue::clock::{Clock, ManualClock};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let clock = ManualClock::new(1_000);
/// clock.sleep(Duration::from_secs(2)).await;
/// assert_eq!(clock.now_epoch_ms(), 3_000);
/// assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Moves the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration_ms(duration), Ordering::SeqCst);
    }

    /// Returns every duration passed to [`sleep`](Clock::sleep), in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(0);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_epoch_ms(), 250);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn manual_clock_records_sleeps() {
        let clock = ManualClock::new(10);
        clock.sleep(Duration::from_secs(1)).await;
        clock.sleep(Duration::from_secs(1)).await;
        assert_eq!(clock.now_epoch_ms(), 2_010);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_epoch_ms() > 1_577_836_800_000);
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_secs(3)), 3_000);
        assert_eq!(duration_ms(Duration::MAX), i64::MAX);
    }
}
