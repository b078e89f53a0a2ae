use super::types::{CounterKey, CounterOutcome};
use crate::error::Result;
use crate::store::SharedStore;
use std::sync::Arc;

/// Fixed-window counters kept in the shared store
#[derive(Clone)]
pub struct SharedCounter {
    store: Arc<dyn SharedStore>,
}

impl SharedCounter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_available()
    }

    /// Atomically count one request; the window starts on the first hit.
    pub async fn increment(&self, key: &CounterKey, window_secs: u64) -> Result<CounterOutcome> {
        let window = self
            .store
            .incr_window(&key.to_store_key(), window_secs)
            .await?;

        Ok(CounterOutcome {
            count: window.count,
            reset_after: window.ttl_secs.min(window_secs),
        })
    }
}

impl std::fmt::Debug for SharedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCounter")
            .field("available", &self.store.is_available())
            .finish()
    }
}
