//! Wall-clock source for activity and burstiness timestamps.
//!
//! Entries stamp every operation with microseconds since the Unix epoch.
//! Latencies are measured separately with `Instant` by the caller.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use smgrstat_core::TimestampUs;

/// Source of "now" in microseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_us(&self) -> TimestampUs;
}

/// Real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_us(&self) -> TimestampUs {
        Utc::now().timestamp_micros()
    }
}

/// Manually advanced clock for deterministic replays and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    pub fn new(start_us: TimestampUs) -> Self {
        Self {
            now_us: AtomicI64::new(start_us),
        }
    }

    pub fn set(&self, now_us: TimestampUs) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance_us(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_us(secs * 1_000_000);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_us(&self) -> TimestampUs {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Convert a microsecond timestamp to a UTC datetime
pub fn to_datetime(us: TimestampUs) -> DateTime<Utc> {
    let secs = us.div_euclid(1_000_000);
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        let now = SystemClock.now_us();
        // After 2020-01-01
        assert!(now > 1_577_836_800_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000_000);
        clock.advance_secs(2);
        clock.advance_us(5);
        assert_eq!(clock.now_us(), 3_000_005);
    }

    #[test]
    fn test_to_datetime() {
        let dt = to_datetime(1_705_329_000_123_456);
        assert_eq!(dt.timestamp(), 1_705_329_000);
        assert_eq!(dt.timestamp_subsec_micros(), 123_456);
    }
}
