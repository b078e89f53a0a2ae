//! Single-flight registry for cache population.
//!
//! The first caller to miss on a key registers a shared future; concurrent
//! callers for the same key await that future instead of starting their own.
//! The flight removes its own registry entry when it finishes, whatever the
//! outcome. [`FlightRegistry::detach`] unregisters a running flight early and
//! marks its [`FlightTicket`] superseded, so the next caller starts afresh.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Value produced by a completed flight
#[derive(Debug, Clone)]
pub struct FlightValue {
    pub payload: serde_json::Value,
    /// Another caller populated the entry before the flight ran
    pub was_cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    /// The source has nothing publicly visible under this id
    NotFound,
    Population(String),
    Serialization(String),
}

pub type FlightResult = Result<FlightValue, FlightError>;

pub type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

/// Handed to the work of one flight; tells it whether it has been detached
#[derive(Debug, Clone, Default)]
pub struct FlightTicket {
    superseded: Arc<AtomicBool>,
}

impl FlightTicket {
    /// The key was invalidated after this flight started
    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
    }
}

struct FlightEntry {
    flight: SharedFlight,
    generation: u64,
    ticket: FlightTicket,
}

type FlightMap = HashMap<String, FlightEntry>;

#[derive(Default)]
pub struct FlightRegistry {
    flights: Arc<Mutex<FlightMap>>,
    generations: AtomicU64,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one with `start` if none is running.
    ///
    /// `start` is only called by the caller that becomes the leader. The
    /// returned flag tells whether that was this caller.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (SharedFlight, bool)
    where
        F: FnOnce(FlightTicket) -> BoxFuture<'static, FlightResult>,
    {
        let mut flights = lock(&self.flights);

        if let Some(entry) = flights.get(key) {
            return (entry.flight.clone(), false);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let ticket = FlightTicket::default();
        let registry = Arc::clone(&self.flights);
        let owned_key = key.to_string();
        let work = start(ticket.clone());

        let flight = async move {
            let result = work.await;
            let mut flights = lock(&registry);
            // A detached flight must not evict the one that replaced it.
            if flights
                .get(&owned_key)
                .map_or(false, |entry| entry.generation == generation)
            {
                flights.remove(&owned_key);
            }
            result
        }
        .boxed()
        .shared();

        flights.insert(
            key.to_string(),
            FlightEntry {
                flight: flight.clone(),
                generation,
                ticket,
            },
        );
        (flight, true)
    }

    /// Unregister the flight for `key`, if any, and mark it superseded.
    ///
    /// Callers already awaiting it still get its result.
    pub fn detach(&self, key: &str) -> bool {
        match lock(&self.flights).remove(key) {
            Some(entry) => {
                entry.ticket.supersede();
                true
            }
            None => false,
        }
    }

    /// Number of flights currently registered
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }
}

impl std::fmt::Debug for FlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightRegistry")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn lock(flights: &Mutex<FlightMap>) -> MutexGuard<'_, FlightMap> {
    match flights.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                lock_kind = "mutex",
                result = "poisoned_recovered",
                "Recovered from poisoned single-flight registry lock"
            );
            poisoned.into_inner()
        }
    }
}
