//! Read-through content cache with version markers
//!
//! Each cached item sits next to a version marker (an RFC 3339 timestamp)
//! under a sibling key. Writers stamp a new marker after publishing; readers
//! compare markers to tell whether their copy is stale. A marker only counts
//! while its content entry exists.
//!
//! Cache faults are never fatal: a read failure is a miss, a write failure is
//! logged and the freshly loaded data is still returned.

pub mod flight;
pub mod keys;

use crate::config::ContentCacheConfig;
use crate::error::{GateError, Result};
use crate::metrics;
use crate::store::SharedStore;
use chrono::{SecondsFormat, Utc};
use flight::{FlightError, FlightRegistry, FlightValue};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use keys::ContentKeyspace;

/// Stored shape of one cached item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContentEntry<T> {
    pub payload: T,
    /// RFC 3339 time the entry was written
    pub cached_at: String,
}

/// Result of [`CacheVersionStore::get_or_populate`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    pub data: T,
    pub was_cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Number of keys (content and marker) actually deleted
    Removed(u64),
    /// Shared store unavailable; nothing was deleted
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearStatus {
    Completed,
    /// Shared store unavailable before the first step
    Skipped,
    /// A scan or delete failed part way; counts cover the work done so far
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearSummary {
    pub deleted: u64,
    pub batches: u64,
    pub status: ClearStatus,
}

/// Fresh version marker, millisecond precision, UTC
pub fn new_version_token() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct CacheVersionStore {
    store: Arc<dyn SharedStore>,
    keyspace: ContentKeyspace,
    default_ttl: Duration,
    scan_batch_size: usize,
    flights: FlightRegistry,
}

impl CacheVersionStore {
    pub fn new(
        store: Arc<dyn SharedStore>,
        keyspace: ContentKeyspace,
        default_ttl: Duration,
        scan_batch_size: usize,
    ) -> Self {
        Self {
            store,
            keyspace,
            default_ttl,
            scan_batch_size: scan_batch_size.max(1),
            flights: FlightRegistry::new(),
        }
    }

    pub fn from_config(config: &ContentCacheConfig, store: Arc<dyn SharedStore>) -> Self {
        Self::new(
            store,
            ContentKeyspace::from(config),
            Duration::from_secs(config.ttl_secs),
            config.scan_batch_size,
        )
    }

    pub fn keyspace(&self) -> &ContentKeyspace {
        &self.keyspace
    }

    fn ttl_secs(&self, ttl: Option<Duration>) -> u64 {
        ttl.unwrap_or(self.default_ttl).as_secs().max(1)
    }

    /// Return the cached item for `id`, loading it with `populate` on a miss.
    ///
    /// Concurrent misses on the same id share a single `populate` call.
    /// `Ok(None)` from `populate` means the item is not publicly visible; it
    /// is reported as [`GateError::ContentNotFound`] and nothing is cached.
    pub async fn get_or_populate<T, F, Fut, E>(
        &self,
        id: &str,
        populate: F,
        ttl: Option<Duration>,
    ) -> Result<CacheLookup<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let content_key = self.keyspace.content_key(id);

        if let Some(payload) = read_entry(self.store.as_ref(), &content_key).await {
            match serde_json::from_value::<T>(payload) {
                Ok(data) => {
                    metrics::record_cache_lookup("hit");
                    debug!(key = %content_key, "Content cache hit");
                    return Ok(CacheLookup {
                        data,
                        was_cached: true,
                    });
                }
                Err(e) => warn!(key = %content_key, error = %e, "Cached entry has unexpected shape"),
            }
        }
        metrics::record_cache_lookup("miss");

        let ttl_secs = self.ttl_secs(ttl);
        let (flight, leader) = self.flights.join_or_start(&content_key, |ticket| {
            let store = Arc::clone(&self.store);
            let key = content_key.clone();
            let fetch = populate();

            async move {
                // A flight that finished just before this one may have filled it.
                if let Some(payload) = read_entry(store.as_ref(), &key).await {
                    if serde_json::from_value::<T>(payload.clone()).is_ok() {
                        return Ok(FlightValue {
                            payload,
                            was_cached: true,
                        });
                    }
                }

                let fetched = fetch
                    .await
                    .map_err(|e| FlightError::Population(e.to_string()))?
                    .ok_or(FlightError::NotFound)?;
                let payload = serde_json::to_value(&fetched)
                    .map_err(|e| FlightError::Serialization(e.to_string()))?;

                if ticket.is_superseded() {
                    debug!(key = %key, "Content changed during population, cache write skipped");
                } else if write_entry(store.as_ref(), &key, &payload, ttl_secs).await
                    && ticket.is_superseded()
                {
                    // Invalidated between the check and the write.
                    drop_entry(store.as_ref(), &key).await;
                }

                Ok(FlightValue {
                    payload,
                    was_cached: false,
                })
            }
            .boxed()
        });

        if !leader {
            debug!(key = %content_key, "Joined in-flight cache population");
        }

        match flight.await {
            Ok(value) => Ok(CacheLookup {
                data: serde_json::from_value(value.payload)?,
                was_cached: value.was_cached,
            }),
            Err(FlightError::NotFound) => {
                metrics::record_cache_lookup("not_found");
                Err(GateError::ContentNotFound(content_key))
            }
            Err(FlightError::Population(message)) => {
                metrics::record_cache_lookup("error");
                Err(GateError::CachePopulation(message))
            }
            Err(FlightError::Serialization(message)) => {
                metrics::record_cache_lookup("error");
                Err(GateError::Serialization(message))
            }
        }
    }

    /// Stamp a new version marker for `id`.
    ///
    /// Returns the new token, or `None` when the write failed and the refresh
    /// was skipped.
    pub async fn refresh_version(&self, id: &str, ttl: Option<Duration>) -> Option<String> {
        let key = self.keyspace.version_key(id);
        let token = new_version_token();

        if !self.store.is_available() {
            warn!(key = %key, "Shared store unavailable, version refresh skipped");
            return None;
        }

        match self.store.set_ex(&key, &token, self.ttl_secs(ttl)).await {
            Ok(()) => {
                debug!(key = %key, version = %token, "Version marker refreshed");
                Some(token)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Version refresh skipped");
                None
            }
        }
    }

    /// Version marker for `id`, present only while its content entry is
    pub async fn current_version(&self, id: &str) -> Option<String> {
        if !self.store.is_available() {
            return None;
        }

        let content_key = self.keyspace.content_key(id);
        match self.store.exists(&content_key).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(key = %content_key, error = %e, "Version lookup failed");
                return None;
            }
        }

        let version_key = self.keyspace.version_key(id);
        self.store
            .get(&version_key)
            .await
            .unwrap_or_else(|e| {
                warn!(key = %version_key, error = %e, "Version lookup failed");
                None
            })
    }

    /// Write `payload` through to the cache after an edit or publish and
    /// stamp a new version. Best effort: returns the new version, if any.
    pub async fn replace<T: Serialize>(
        &self,
        id: &str,
        payload: &T,
        ttl: Option<Duration>,
    ) -> Option<String> {
        let key = self.keyspace.content_key(id);
        self.flights.detach(&key);

        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Content not serializable, cache write skipped");
                return None;
            }
        };

        if !write_entry(self.store.as_ref(), &key, &payload, self.ttl_secs(ttl)).await {
            return None;
        }
        self.refresh_version(id, ttl).await
    }

    /// Remove the content entry and its version marker in one delete.
    ///
    /// A population already running for `id` is detached: it will not write
    /// its result, and the next lookup starts a new one.
    pub async fn invalidate(&self, id: &str) -> InvalidationOutcome {
        let keys = [self.keyspace.content_key(id), self.keyspace.version_key(id)];
        if self.flights.detach(&keys[0]) {
            debug!(key = %keys[0], "Detached in-flight population");
        }

        if !self.store.is_available() {
            warn!(key = %keys[0], "Shared store unavailable, invalidation skipped");
            metrics::record_cache_invalidation("skipped");
            return InvalidationOutcome::Skipped;
        }

        match self.store.del(&keys).await {
            Ok(removed) => {
                debug!(key = %keys[0], removed, "Content invalidated");
                metrics::record_cache_invalidation("removed");
                InvalidationOutcome::Removed(removed)
            }
            Err(e) => {
                warn!(key = %keys[0], error = %e, "Invalidation skipped");
                metrics::record_cache_invalidation("skipped");
                InvalidationOutcome::Skipped
            }
        }
    }

    /// Delete every key matching `pattern`, one scan batch at a time
    pub async fn clear_all(&self, pattern: &str) -> ClearSummary {
        let mut summary = ClearSummary {
            deleted: 0,
            batches: 0,
            status: ClearStatus::Completed,
        };

        if !self.store.is_available() {
            warn!(pattern, "Shared store unavailable, bulk clear skipped");
            summary.status = ClearStatus::Skipped;
            return summary;
        }

        let mut cursor = 0;
        loop {
            let (next, keys) = match self.store.scan(cursor, pattern, self.scan_batch_size).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(pattern, error = %e, deleted = summary.deleted, "Bulk clear interrupted");
                    summary.status = ClearStatus::Interrupted;
                    return summary;
                }
            };
            summary.batches += 1;

            if !keys.is_empty() {
                match self.store.del(&keys).await {
                    Ok(removed) => summary.deleted += removed,
                    Err(e) => {
                        warn!(pattern, error = %e, deleted = summary.deleted, "Bulk clear interrupted");
                        summary.status = ClearStatus::Interrupted;
                        return summary;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(
            pattern,
            deleted = summary.deleted,
            batches = summary.batches,
            "Bulk clear completed"
        );
        summary
    }

    /// Number of populations currently in flight
    pub fn populations_in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

impl std::fmt::Debug for CacheVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheVersionStore")
            .field("keyspace", &self.keyspace)
            .field("default_ttl", &self.default_ttl)
            .field("scan_batch_size", &self.scan_batch_size)
            .finish()
    }
}

/// Read one entry's payload; every failure is a miss
async fn read_entry(store: &dyn SharedStore, key: &str) -> Option<serde_json::Value> {
    if !store.is_available() {
        return None;
    }

    let raw = match store.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, treating as miss");
            return None;
        }
    };

    match serde_json::from_str::<CachedContentEntry<serde_json::Value>>(&raw) {
        Ok(entry) => Some(entry.payload),
        Err(e) => {
            warn!(key, error = %e, "Discarding malformed cache entry");
            None
        }
    }
}

/// Write one entry; returns whether it landed
async fn write_entry(
    store: &dyn SharedStore,
    key: &str,
    payload: &serde_json::Value,
    ttl_secs: u64,
) -> bool {
    if !store.is_available() {
        debug!(key, "Shared store unavailable, cache write skipped");
        return false;
    }

    let entry = CachedContentEntry {
        payload,
        cached_at: new_version_token(),
    };
    let raw = match serde_json::to_string(&entry) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Cache entry not serializable, write skipped");
            return false;
        }
    };

    match store.set_ex(key, &raw, ttl_secs).await {
        Ok(()) => true,
        Err(e) => {
            warn!(key, error = %e, "Cache write failed");
            false
        }
    }
}

async fn drop_entry(store: &dyn SharedStore, key: &str) {
    if let Err(e) = store.del(&[key.to_string()]).await {
        warn!(key, error = %e, "Failed to drop superseded cache entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cache() -> (CacheVersionStore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheVersionStore::new(
            store.clone(),
            ContentKeyspace::default(),
            Duration::from_secs(3600),
            10,
        );
        (cache, store)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (cache, store) = cache();

        let first = cache
            .get_or_populate("hello", || async { Ok::<_, String>(Some(json!({"title": "Hello"}))) }, None)
            .await
            .unwrap();
        assert!(!first.was_cached);
        assert!(store.exists("blog:post:hello").await.unwrap());

        let second: CacheLookup<serde_json::Value> = cache
            .get_or_populate("hello", || async { Err::<Option<serde_json::Value>, _>("unused") }, None)
            .await
            .unwrap();
        assert!(second.was_cached);
        assert_eq!(second.data, json!({"title": "Hello"}));
    }

    #[tokio::test]
    async fn test_not_found_writes_nothing() {
        let (cache, store) = cache();

        let result = cache
            .get_or_populate("draft", || async { Ok::<Option<String>, String>(None) }, None)
            .await;
        assert!(matches!(result, Err(GateError::ContentNotFound(_))));
        assert!(!store.exists("blog:post:draft").await.unwrap());
    }

    #[tokio::test]
    async fn test_population_error_surfaces() {
        let (cache, store) = cache();

        let result = cache
            .get_or_populate(
                "broken",
                || async { Err::<Option<String>, _>("database down") },
                None,
            )
            .await;
        match result {
            Err(GateError::CachePopulation(message)) => assert_eq!(message, "database down"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!store.exists("blog:post:broken").await.unwrap());
        assert_eq!(cache.populations_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_uncached() {
        let (cache, store) = cache();
        store.set_available(false);

        let lookup = cache
            .get_or_populate("hello", || async { Ok::<_, String>(Some(1u32)) }, None)
            .await
            .unwrap();
        assert_eq!(lookup.data, 1);
        assert!(!lookup.was_cached);

        assert_eq!(cache.invalidate("hello").await, InvalidationOutcome::Skipped);
        assert_eq!(cache.refresh_version("hello", None).await, None);
        assert_eq!(cache.clear_all("blog:*").await.status, ClearStatus::Skipped);
    }

    #[tokio::test]
    async fn test_version_requires_content() {
        let (cache, _store) = cache();

        let version = cache.refresh_version("hello", None).await.unwrap();
        assert_eq!(cache.current_version("hello").await, None);

        let replaced = cache.replace("hello", &json!({"title": "Hi"}), None).await.unwrap();
        assert_ne!(cache.current_version("hello").await, None);
        assert_eq!(cache.current_version("hello").await, Some(replaced.clone()));
        assert!(replaced >= version);
    }

    #[test]
    fn test_version_token_format() {
        let token = new_version_token();
        assert!(chrono::DateTime::parse_from_rfc3339(&token).is_ok());
        assert!(token.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_repopulated() {
        let (cache, store) = cache();
        store
            .set_ex(
                "blog:post:hello",
                r#"{"payload":"old-shape","cachedAt":"2024-01-01T00:00:00.000Z"}"#,
                60,
            )
            .await
            .unwrap();

        let lookup = cache
            .get_or_populate("hello", || async { Ok::<_, String>(Some(5u32)) }, None)
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup { data: 5, was_cached: false });

        let again = cache
            .get_or_populate("hello", || async { Ok::<_, String>(Some(6u32)) }, None)
            .await
            .unwrap();
        assert_eq!(again, CacheLookup { data: 5, was_cached: true });
    }
}
