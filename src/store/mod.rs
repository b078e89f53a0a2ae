//! Shared key-value store
//!
//! Both the rate limiter's counters and the content cache live in one shared
//! store. Production deployments use [`RedisStore`]; [`MemoryStore`] keeps the
//! same semantics in-process for tests and single-instance development.
//!
//! Every operation may fail with [`GateError::BackendUnavailable`]; callers
//! decide whether that degrades, skips, or denies.
//!
//! [`GateError::BackendUnavailable`]: crate::error::GateError::BackendUnavailable

pub mod lua_scripts;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Post-increment state of a windowed counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after this increment
    pub count: u64,
    /// Seconds until the counter expires
    pub ttl_secs: u64,
}

/// Operations the admission layer and the content cache need from the shared store
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Current liveness flag. Cheap; never performs I/O.
    fn is_available(&self) -> bool;

    /// Round-trip health check
    async fn ping(&self) -> Result<()>;

    /// Atomically increment `key`, arming a `window_secs` expiry only when the
    /// counter goes from 0 to 1, and report the remaining TTL.
    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<WindowCount>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Delete all `keys` in one command. Returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// One cursor step over the key space. A returned cursor of 0 ends the scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}
