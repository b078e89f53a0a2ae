use super::local::LocalCounter;
use super::shared::SharedCounter;
use super::types::{BackendKind, CounterKey, CounterOutcome};
use crate::error::Result;

/// The counter selected for a single request
///
/// Chosen fresh on every check. Counts are never copied between the two
/// backends, so a store flap can briefly admit up to twice the quota.
#[derive(Debug, Clone, Copy)]
pub enum CounterBackend<'a> {
    Shared(&'a SharedCounter),
    Local(&'a LocalCounter),
}

impl CounterBackend<'_> {
    pub fn kind(&self) -> BackendKind {
        match self {
            CounterBackend::Shared(_) => BackendKind::Shared,
            CounterBackend::Local(_) => BackendKind::Memory,
        }
    }

    pub async fn increment(&self, key: &CounterKey, window_secs: u64) -> Result<CounterOutcome> {
        match self {
            CounterBackend::Shared(counter) => counter.increment(key, window_secs).await,
            CounterBackend::Local(counter) => Ok(counter.increment(key, window_secs)),
        }
    }
}
