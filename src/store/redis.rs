use super::lua_scripts::FIXED_WINDOW_SCRIPT;
use super::{SharedStore, WindowCount};
use crate::config::RedisConfig;
use crate::error::{GateError, Result};
use ::redis::{aio::ConnectionManager, AsyncCommands, RedisError, RedisResult, Script};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Redis-backed shared store
///
/// Every command is bounded by the configured operation timeout. Connection
/// level failures and timeouts flip the liveness flag down; the next successful
/// command (or the health probe) flips it back up.
pub struct RedisStore {
    client: ::redis::Client,
    connection: RwLock<Option<ConnectionManager>>,
    available: AtomicBool,
    op_timeout: Duration,
    window_script: Script,
}

impl RedisStore {
    /// Create a store for `config.url`.
    ///
    /// An unparsable URL is a configuration error. An unreachable server is
    /// not: the store starts marked down and the health probe keeps retrying.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = ::redis::Client::open(config.url.as_str())
            .map_err(|e| GateError::Config(format!("Invalid Redis URL: {}", e)))?;
        let op_timeout = Duration::from_millis(config.operation_timeout_ms);

        let store = Self {
            client,
            connection: RwLock::new(None),
            available: AtomicBool::new(false),
            op_timeout,
            window_script: Script::new(FIXED_WINDOW_SCRIPT),
        };

        match store.reconnect().await {
            Ok(()) => info!(url = %config.url, "Connected to Redis"),
            Err(e) => warn!(
                url = %config.url,
                error = %e,
                "Redis unreachable at startup, starting in degraded mode"
            ),
        }

        Ok(store)
    }

    async fn reconnect(&self) -> Result<()> {
        let manager = timeout(self.op_timeout, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|_| GateError::BackendUnavailable("Redis connect timed out".to_string()))?
            .map_err(|e| GateError::BackendUnavailable(format!("Redis connect failed: {}", e)))?;

        *self.connection.write().await = Some(manager);
        self.set_available(true);
        Ok(())
    }

    fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            if available {
                info!("Redis marked available");
            } else {
                warn!("Redis marked unavailable");
            }
        }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| GateError::BackendUnavailable("no Redis connection".to_string()))
    }

    /// Run one command against a cloned connection handle, bounded by the
    /// operation timeout.
    async fn execute<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;

        match timeout(self.op_timeout, f(conn)).await {
            Ok(Ok(value)) => {
                self.set_available(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                if is_connectivity_error(&e) {
                    self.set_available(false);
                }
                debug!(op, error = %e, "Redis command failed");
                Err(GateError::BackendUnavailable(format!("{} failed: {}", op, e)))
            }
            Err(_) => {
                self.set_available(false);
                Err(GateError::BackendUnavailable(format!(
                    "{} timed out after {}ms",
                    op,
                    self.op_timeout.as_millis()
                )))
            }
        }
    }

    /// Spawn a background task that pings Redis every `every` and reconnects
    /// when no connection exists yet.
    pub fn spawn_health_probe(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            info!(interval_secs = every.as_secs(), "Starting Redis health probe");

            loop {
                ticker.tick().await;

                let has_connection = store.connection.read().await.is_some();
                let result = if has_connection {
                    store.ping().await
                } else {
                    store.reconnect().await
                };

                if let Err(e) = result {
                    debug!(error = %e, "Redis health probe failed");
                    store.set_available(false);
                }
            }
        })
    }
}

fn is_connectivity_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

#[async_trait]
impl SharedStore for RedisStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        self.execute("PING", |mut conn| async move {
            ::redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<WindowCount> {
        let script = &self.window_script;
        let result = self
            .execute("INCR_WINDOW", |mut conn| async move {
                script
                    .key(key)
                    .arg(window_secs)
                    .invoke_async::<_, Vec<i64>>(&mut conn)
                    .await
            })
            .await?;

        match result.as_slice() {
            [count, ttl] => Ok(WindowCount {
                count: (*count).max(0) as u64,
                ttl_secs: (*ttl).max(0) as u64,
            }),
            other => Err(GateError::Internal(format!(
                "unexpected window script reply: {:?}",
                other
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.execute("GET", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.execute("SETEX", |mut conn| async move {
            conn.set_ex(key, value, ttl_secs).await
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.execute("DEL", |mut conn| async move { conn.del(keys).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.execute("EXISTS", |mut conn| async move { conn.exists(key).await })
            .await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.execute("SCAN", |mut conn| async move {
            ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async::<_, (u64, Vec<String>)>(&mut conn)
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            operation_timeout_ms: 500,
            health_check_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..test_config()
        };
        let result = RedisStore::connect(&config).await;
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_starts_degraded() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            ..test_config()
        };
        let store = RedisStore::connect(&config).await.unwrap();
        assert!(!store.is_available());
        assert!(matches!(
            store.get("anything").await,
            Err(GateError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_window_counter() {
        let store = RedisStore::connect(&test_config()).await.unwrap();
        assert!(store.is_available());

        let key = format!("rate:test:{}", std::process::id());
        store.del(&[key.clone()]).await.unwrap();

        let first = store.incr_window(&key, 60).await.unwrap();
        assert_eq!(first.count, 1);
        assert!(first.ttl_secs <= 60);

        let second = store.incr_window(&key, 60).await.unwrap();
        assert_eq!(second.count, 2);

        assert_eq!(store.del(&[key]).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = RedisStore::connect(&test_config()).await.unwrap();
        assert!(store.ping().await.is_ok());
    }
}
