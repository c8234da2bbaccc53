//! Time source for the store.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Local, TimeZone, Timelike, Utc};

/// Source of epoch-millisecond timestamps.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Local wall-clock hour (0-23) of an epoch-millisecond timestamp.
pub fn local_hour(millis: i64) -> u32 {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.hour())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_millis(), 100);
        clock.advance(50);
        assert_eq!(clock.now_millis(), 150);
        clock.set(7);
        assert_eq!(clock.now_millis(), 7);
    }

    #[test]
    fn test_local_hour_in_range() {
        let now = SystemClock.now_millis();
        assert!(local_hour(now) < 24);
        assert_eq!(local_hour(now), local_hour(now));
    }
}
