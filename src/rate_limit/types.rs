use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Window used when neither the route nor the table default sets one
pub const FALLBACK_WINDOW_SECS: u64 = 60;
/// Quota used when neither the route nor the table default sets one
pub const FALLBACK_MAX_REQUESTS: u32 = 100;
/// Longest accepted window: one year
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Which requests a route entry applies to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRule {
    /// Path pattern, e.g. `/blog/:slug`
    pub url: String,
    /// HTTP method; any method when absent
    #[serde(default)]
    pub method: Option<String>,
}

/// One entry of the route table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuotaConfig {
    #[serde(rename = "match")]
    pub match_rule: MatchRule,
    #[serde(default)]
    pub window_seconds: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    /// Honor an authenticated admin bypass on this route
    #[serde(default)]
    pub admin_bypass: Option<bool>,
    /// Answer 503 instead of degrading to local counters when the store is down
    #[serde(default)]
    pub stop_in_redis_down: Option<bool>,
}

impl RouteQuotaConfig {
    /// Field-level validation. Pattern syntax is left to the matcher.
    pub fn check(&self) -> Result<(), String> {
        if self.match_rule.url.trim().is_empty() {
            return Err("match.url cannot be empty".to_string());
        }
        if let Some(method) = &self.match_rule.method {
            if http::Method::from_bytes(method.as_bytes()).is_err() {
                return Err(format!("invalid HTTP method '{}'", method));
            }
        }
        match self.window_seconds {
            Some(0) => return Err("windowSeconds must be > 0".to_string()),
            Some(secs) if secs > MAX_WINDOW_SECS => {
                return Err(format!("windowSeconds must be <= {}", MAX_WINDOW_SECS))
            }
            _ => {}
        }
        if self.max_requests == Some(0) {
            return Err("maxRequests must be > 0".to_string());
        }
        Ok(())
    }
}

/// The table-wide `default` entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDefaults {
    #[serde(default)]
    pub window_seconds: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub admin_bypass: Option<bool>,
    #[serde(default)]
    pub stop_in_redis_down: Option<bool>,
}

/// Fully resolved quota for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitContext {
    /// Matched rule identity, or `default:<normalized path>`
    pub routing_key: String,
    pub window_secs: u64,
    pub max_requests: u32,
    pub admin_bypass: bool,
    pub stop_on_outage: bool,
}

impl LimitContext {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Counter identity: one counter per (rule, client)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub routing_key: String,
    pub client_id: String,
}

impl CounterKey {
    pub fn new(routing_key: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            client_id: client_id.into(),
        }
    }

    /// Key of this counter in the shared store
    pub fn to_store_key(&self) -> String {
        format!("rate:{}:{}", self.routing_key, self.client_id)
    }
}

/// Counter state after one increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    pub count: u64,
    /// Seconds until the window closes
    pub reset_after: u64,
}

/// Which counter backend answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Shared,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Shared => "shared",
            BackendKind::Memory => "memory",
        }
    }
}

/// Final admission outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Admin bypass granted; no counter was touched
    Bypass,
    QuotaExceeded { retry_after: u64 },
    /// Shared store down on a route that must not degrade
    StoreUnavailable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Bypass => "bypass",
            Verdict::QuotaExceeded { .. } => "quota_exceeded",
            Verdict::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Admission decision with the metadata surfaced to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub verdict: Verdict,
    pub routing_key: String,
    pub limit: u32,
    pub remaining: u32,
    /// Backend that counted the request, if any did
    pub backend: Option<BackendKind>,
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self.verdict, Verdict::Allow | Verdict::Bypass)
    }

    /// Whether the local fallback answered instead of the shared store
    pub fn is_degraded(&self) -> bool {
        self.backend == Some(BackendKind::Memory)
    }
}

/// What the admission gate needs to know about an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub method: String,
    /// Request path; a query string is tolerated and ignored
    pub path: String,
    pub client_id: String,
    pub bearer_token: Option<String>,
}

impl AdmissionRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_id: client_id.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}
