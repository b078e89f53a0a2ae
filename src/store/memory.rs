use super::{SharedStore, WindowCount};
use crate::clock::{expiry_after, secs_until, Clock, SystemClock};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process implementation of [`SharedStore`]
///
/// Mirrors the Redis semantics the rest of the crate relies on (atomic
/// windowed increments, TTLs, multi-key delete, cursor scans) on a single
/// process. Availability can be toggled to simulate an outage.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    // Open scan cursors, each mapped to the last key it returned
    cursors: DashMap<u64, String>,
    next_cursor: AtomicU64,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            cursors: DashMap::new(),
            next_cursor: AtomicU64::new(1),
            available: AtomicBool::new(true),
            clock,
        }
    }

    /// Simulate the store going down or coming back
    pub fn set_available(&self, available: bool) {
        debug!(available, "memory store availability changed");
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self, op: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GateError::BackendUnavailable(format!(
                "{} failed: memory store marked unavailable",
                op
            )))
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn live_keys(&self, pattern: &glob::Pattern) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now) && pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_available("PING")
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<WindowCount> {
        self.ensure_available("INCR_WINDOW")?;
        let now = self.clock.now();

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry {
                value: "0".to_string(),
                expires_at: None,
            });

        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let current: u64 = entry.value.parse().map_err(|_| {
            GateError::Internal(format!("value at {} is not an integer", key))
        })?;
        let next = current + 1;
        entry.value = next.to_string();

        if next == 1 {
            entry.expires_at = Some(expiry_after(now, window_secs));
        }

        let ttl_secs = entry
            .expires_at
            .map_or(window_secs, |at| secs_until(now, at));

        Ok(WindowCount {
            count: next,
            ttl_secs,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available("GET")?;
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.ensure_available("SETEX")?;
        let expires_at = expiry_after(self.clock.now(), ttl_secs);
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.ensure_available("DEL")?;
        let now = self.clock.now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_available("EXISTS")?;
        Ok(self.live_value(key).is_some())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.ensure_available("SCAN")?;
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| GateError::Internal(format!("invalid scan pattern: {}", e)))?;

        // Resume strictly after the last key this cursor handed out, so keys
        // deleted between steps never cause later keys to be skipped.
        let after = if cursor == 0 {
            None
        } else {
            self.cursors.remove(&cursor).map(|(_, last)| last)
        };

        let mut remaining: Vec<String> = self
            .live_keys(&pattern)
            .into_iter()
            .filter(|key| after.as_ref().map_or(true, |last| key > last))
            .collect();

        let take = count.max(1);
        let exhausted = remaining.len() <= take;
        remaining.truncate(take);
        let batch = remaining;

        let next = match batch.last() {
            Some(last) if !exhausted => {
                let id = self.next_cursor.fetch_add(1, Ordering::SeqCst);
                self.cursors.insert(id, last.clone());
                id
            }
            _ => 0,
        };

        Ok((next, batch))
    }
}
