//! Time source used by the local counter and the in-process store.
//!
//! Production code runs on [`SystemClock`]; tests inject a [`ManualClock`] and
//! advance it explicitly instead of sleeping.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

/// Longest expiry the clock will schedule; later deadlines are clamped to it
pub const MAX_EXPIRY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Instant `secs` seconds after `now`, clamped to [`MAX_EXPIRY_SECS`]
pub fn expiry_after(now: Instant, secs: u64) -> Instant {
    let ahead = Duration::from_secs(secs.min(MAX_EXPIRY_SECS));
    now.checked_add(ahead).unwrap_or(now)
}

/// Whole seconds left until `deadline`, rounded up
pub fn secs_until(now: Instant, deadline: Instant) -> u64 {
    let left = deadline.saturating_duration_since(now);
    if left.subsec_nanos() > 0 {
        left.as_secs() + 1
    } else {
        left.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }

    #[test]
    fn test_secs_until_rounds_up() {
        let now = Instant::now();
        assert_eq!(secs_until(now, now + Duration::from_millis(1500)), 2);
        assert_eq!(secs_until(now, now + Duration::from_secs(3)), 3);
        assert_eq!(secs_until(now + Duration::from_secs(1), now), 0);
    }

    #[test]
    fn test_expiry_after_clamps_huge_values() {
        let now = Instant::now();
        assert_eq!(expiry_after(now, 30), now + Duration::from_secs(30));

        let far = expiry_after(now, u64::MAX);
        assert_eq!(secs_until(now, far), MAX_EXPIRY_SECS);
    }
}
