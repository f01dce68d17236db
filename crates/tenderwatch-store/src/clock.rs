//! Monotonic insert clock.
//!
//! Every backend stamps documents with `ts`: seconds since the epoch as
//! `f64`. Two inserts in the same microsecond would tie, so the clock never
//! hands out a value less than or equal to the previous one.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Smallest step between two issued timestamps.
const STEP: f64 = 1e-6;

/// A strictly increasing wall-clock source.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<f64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future timestamp exceed `ts` (e.g. the largest stored one).
    pub fn observe(&self, ts: f64) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if ts > *last {
            *last = ts;
        }
    }

    /// Next timestamp, strictly greater than every one issued or observed.
    pub fn next(&self) -> f64 {
        let now = now_secs();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let ts = if now > *last {
            now
        } else {
            // Bump by at least one representable step at this magnitude.
            let bumped = *last + STEP;
            if bumped > *last {
                bumped
            } else {
                f64::from_bits(last.to_bits() + 1)
            }
        };
        *last = ts;
        ts
    }
}

/// Current time in fractional seconds since the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.next();
        for _ in 0..10_000 {
            let ts = clock.next();
            assert!(ts > prev);
            prev = ts;
        }
    }

    #[test]
    fn test_observe_future_value() {
        let clock = MonotonicClock::new();
        let future = now_secs() + 3600.0;
        clock.observe(future);
        assert!(clock.next() > future);
    }

    proptest::proptest! {
        #[test]
        fn prop_next_exceeds_any_observed(offsets in proptest::collection::vec(-1.0e6f64..1.0e6, 1..32)) {
            let clock = MonotonicClock::new();
            let base = now_secs();
            let mut prev = 0.0;
            for off in offsets {
                clock.observe(base + off);
                let ts = clock.next();
                proptest::prop_assert!(ts > prev);
                proptest::prop_assert!(ts > base + off);
                prev = ts;
            }
        }
    }
}
