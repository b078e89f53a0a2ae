use crate::error::{GateError, Result};
use crate::rate_limit::types::{QuotaDefaults, RouteQuotaConfig, MAX_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const REDIS_URL_ENV: &str = "SITEGATE_REDIS_URL";
pub const JWT_SECRET_ENV: &str = "SITEGATE_JWT_SECRET";
pub const LOG_FORMAT_ENV: &str = "SITEGATE_LOG_FORMAT";

/// Main sitegate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shared store configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Authentication configuration (admin bypass)
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Content cache configuration
    #[serde(default)]
    pub content_cache: ContentCacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL, or `memory://` for the in-process store
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Upper bound for any single store operation
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Interval of the background liveness probe
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT configuration for admin tokens
    pub jwt: Option<JwtConfig>,
}

/// JWT authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared secret for HS256/HS384/HS512
    pub secret: String,
    /// Algorithm to use
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// Issuer to validate
    pub issuer: Option<String>,
    /// Audience to validate
    pub audience: Option<String>,
    /// Value the `role` claim must carry for the bypass to apply
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

/// Rate limiting configuration
///
/// `routes` stays untyped until load so one malformed entry can be skipped
/// without rejecting the whole table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Table-wide defaults
    #[serde(default)]
    pub default: QuotaDefaults,
    /// Ordered route table; first match wins
    #[serde(default)]
    pub routes: Vec<serde_yaml::Value>,
    /// Sweep interval for expired local fallback counters (disabled when unset)
    #[serde(default)]
    pub local_reaper_secs: Option<u64>,
}

/// Content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCacheConfig {
    /// Leading key segment, e.g. `blog`
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// Content kind segment, e.g. `post`
    #[serde(default = "default_cache_kind")]
    pub kind: String,
    /// Lifetime of content entries and their version markers
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Keys requested per SCAN step during bulk clears
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

fn default_log_filter() -> String {
    "sitegate=info,tower_http=info".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    500
}

fn default_health_check_secs() -> u64 {
    5
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_admin_role() -> String {
    "admin".to_string()
}

fn default_cache_namespace() -> String {
    "blog".to_string()
}

fn default_cache_kind() -> String {
    "post".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_scan_batch_size() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            operation_timeout_ms: default_operation_timeout_ms(),
            health_check_secs: default_health_check_secs(),
        }
    }
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            kind: default_cache_kind(),
            ttl_secs: default_cache_ttl_secs(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

impl RedisConfig {
    /// Whether the in-process store was requested instead of Redis
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

impl RateLimitingConfig {
    /// Parse the route table, logging and skipping entries that do not
    /// deserialize or fail field validation.
    ///
    /// Pattern syntax is checked later, by the matcher, where a bad pattern is
    /// fatal.
    pub fn route_entries(&self) -> Vec<RouteQuotaConfig> {
        self.routes
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                match serde_yaml::from_value::<RouteQuotaConfig>(raw.clone()) {
                    Ok(route) => match route.check() {
                        Ok(()) => Some(route),
                        Err(reason) => {
                            warn!(index, %reason, "Skipping invalid rate limit route entry");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(index, error = %e, "Skipping malformed rate limit route entry");
                        None
                    }
                }
            })
            .collect()
    }
}

impl SiteConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `SITEGATE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REDIS_URL_ENV) {
            self.redis.url = url;
        }

        if let Some(secret) = lookup(JWT_SECRET_ENV) {
            match self.auth.as_mut().and_then(|auth| auth.jwt.as_mut()) {
                Some(jwt) => jwt.secret = secret,
                None => {
                    self.auth = Some(AuthConfig {
                        jwt: Some(JwtConfig {
                            secret,
                            algorithm: default_jwt_algorithm(),
                            issuer: None,
                            audience: None,
                            admin_role: default_admin_role(),
                        }),
                    })
                }
            }
        }

        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(GateError::Config(format!(
                        "{} must be 'json' or 'compact', got '{}'",
                        LOG_FORMAT_ENV, other
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            return Err(GateError::Config("Redis URL cannot be empty".to_string()));
        }

        if self.redis.operation_timeout_ms == 0 {
            return Err(GateError::Config(
                "Redis operation timeout must be > 0".to_string(),
            ));
        }

        if self.redis.health_check_secs == 0 {
            return Err(GateError::Config(
                "Redis health check interval must be > 0".to_string(),
            ));
        }

        if let Some(jwt) = self.auth.as_ref().and_then(|auth| auth.jwt.as_ref()) {
            if jwt.secret.is_empty() {
                return Err(GateError::Config("JWT secret cannot be empty".to_string()));
            }
        }

        let defaults = &self.rate_limiting.default;
        if defaults.max_requests == Some(0) {
            return Err(GateError::Config(
                "Default rate limit maxRequests must be > 0".to_string(),
            ));
        }
        if defaults.window_seconds == Some(0) {
            return Err(GateError::Config(
                "Default rate limit windowSeconds must be > 0".to_string(),
            ));
        }
        if defaults.window_seconds.map_or(false, |secs| secs > MAX_WINDOW_SECS) {
            return Err(GateError::Config(format!(
                "Default rate limit windowSeconds must be <= {}",
                MAX_WINDOW_SECS
            )));
        }

        if self.rate_limiting.local_reaper_secs == Some(0) {
            return Err(GateError::Config(
                "Local reaper interval must be > 0".to_string(),
            ));
        }

        let cache = &self.content_cache;
        if cache.namespace.is_empty() || cache.kind.is_empty() {
            return Err(GateError::Config(
                "Content cache namespace and kind cannot be empty".to_string(),
            ));
        }
        if cache.ttl_secs == 0 {
            return Err(GateError::Config(
                "Content cache ttl must be > 0".to_string(),
            ));
        }
        if cache.scan_batch_size == 0 {
            return Err(GateError::Config(
                "Content cache scan batch size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
