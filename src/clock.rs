//! Wall-clock abstraction.
//!
//! The engine schedules against absolute unix timestamps and must react to
//! system clock jumps, so it never reads `SystemTime` directly. Everything
//! goes through a [`Clock`] handle, which tests replace with a manually
//! driven clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Absolute wall-clock time in whole unix seconds. Zero means "unset".
pub type Timestamp = i64;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock backed by `SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as Timestamp,
            // clock before the epoch; report the floor rather than panic
            Err(_) => 0,
        }
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Break a duration in seconds down into days/hours/minutes/seconds for
/// operator-facing log lines.
pub fn time_breakdown(seconds: u64) -> (u64, u64, u64, u64) {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    (days, hours, minutes, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_sane() {
        // any real system we run on is past 2020
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(60);
        assert_eq!(clock.now(), 1_060);
        clock.set(500);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn test_time_breakdown() {
        assert_eq!(time_breakdown(0), (0, 0, 0, 0));
        assert_eq!(time_breakdown(59), (0, 0, 0, 59));
        assert_eq!(time_breakdown(3_661), (0, 1, 1, 1));
        assert_eq!(time_breakdown(90_061), (1, 1, 1, 1));
    }
}
