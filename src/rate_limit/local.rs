use super::types::{CounterKey, CounterOutcome};
use crate::clock::{expiry_after, secs_until, Clock};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// One fixed window in the local map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: u64,
    pub expires_at: Instant,
}

/// In-process fixed-window counters used while the shared store is down
///
/// Consistent within one process only. Expired records are overwritten on the
/// next hit to the same key; nothing else removes them unless a reaper runs.
#[derive(Debug)]
pub struct LocalCounter {
    records: DashMap<CounterKey, CounterRecord>,
    clock: Arc<dyn Clock>,
}

impl LocalCounter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Count one request against `key`
    pub fn increment(&self, key: &CounterKey, window_secs: u64) -> CounterOutcome {
        let now = self.clock.now();

        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| CounterRecord {
                count: 0,
                expires_at: expiry_after(now, window_secs),
            });

        if record.count == 0 || now >= record.expires_at {
            *record = CounterRecord {
                count: 1,
                expires_at: expiry_after(now, window_secs),
            };
        } else {
            record.count += 1;
        }

        CounterOutcome {
            count: record.count,
            reset_after: secs_until(now, record.expires_at).min(window_secs),
        }
    }

    /// Drop every record whose window has closed. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| now < record.expires_at);
        before.saturating_sub(self.records.len())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every`
    pub fn spawn_reaper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            info!(interval_secs = every.as_secs(), "Starting local counter reaper");

            loop {
                ticker.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "Swept expired local counters");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn counter() -> (LocalCounter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (LocalCounter::new(clock.clone()), clock)
    }

    #[test]
    fn test_local_counter_counts_within_window() {
        let (counter, clock) = counter();
        let key = CounterKey::new("GET:/tags", "192.168.1.1");

        assert_eq!(counter.increment(&key, 60).count, 1);
        clock.advance(Duration::from_secs(20));

        let outcome = counter.increment(&key, 60);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.reset_after, 40);
    }

    #[test]
    fn test_local_counter_resets_after_window() {
        let (counter, clock) = counter();
        let key = CounterKey::new("GET:/tags", "192.168.1.1");

        for _ in 0..5 {
            counter.increment(&key, 10);
        }
        clock.advance(Duration::from_secs(10));

        let outcome = counter.increment(&key, 10);
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.reset_after, 10);
    }

    #[test]
    fn test_local_counter_different_keys() {
        let (counter, _clock) = counter();
        let key1 = CounterKey::new("GET:/tags", "192.168.1.1");
        let key2 = CounterKey::new("GET:/tags", "192.168.1.2");

        counter.increment(&key1, 60);
        counter.increment(&key1, 60);
        assert_eq!(counter.increment(&key2, 60).count, 1);
        assert_eq!(counter.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_expired_records() {
        let (counter, clock) = counter();

        counter.increment(&CounterKey::new("short", "c"), 5);
        counter.increment(&CounterKey::new("long", "c"), 60);
        clock.advance(Duration::from_secs(5));

        assert_eq!(counter.sweep_expired(), 1);
        assert_eq!(counter.len(), 1);
    }

    #[tokio::test]
    async fn test_reaper_sweeps_in_background() {
        let (counter, clock) = counter();
        let counter = Arc::new(counter);

        counter.increment(&CounterKey::new("GET:/", "c"), 1);
        clock.advance(Duration::from_secs(2));

        let handle = Arc::clone(&counter).spawn_reaper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(counter.is_empty());
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let (counter, _clock) = counter();
        let key = CounterKey::new("GET:/archive", "c");

        assert_eq!(counter.increment(&key, u64::MAX).count, 1);
        let outcome = counter.increment(&key, u64::MAX);
        assert_eq!(outcome.count, 2);
        assert!(outcome.reset_after > 0);
    }
}
