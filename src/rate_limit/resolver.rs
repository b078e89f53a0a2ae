use super::types::{
    LimitContext, QuotaDefaults, FALLBACK_MAX_REQUESTS, FALLBACK_WINDOW_SECS,
};
use crate::router::{normalize_path, RoutePatternMatcher};
use tracing::trace;

/// Turns a request's method and path into the quota that governs it
#[derive(Debug, Clone)]
pub struct LimitContextResolver {
    matcher: RoutePatternMatcher,
    defaults: QuotaDefaults,
}

impl LimitContextResolver {
    pub fn new(matcher: RoutePatternMatcher, defaults: QuotaDefaults) -> Self {
        Self { matcher, defaults }
    }

    /// Resolve the quota for one request.
    ///
    /// Each field comes from the matched route when it sets one, else from the
    /// table default, else from the built-in fallback. Reads are lenient and
    /// writes strict unless configured otherwise.
    pub fn resolve(&self, method: &str, path: &str) -> LimitContext {
        let method = method.to_uppercase();
        let defaults = &self.defaults;

        match self.matcher.match_route(&method, path) {
            Some(matched) => {
                let route = matched.quota;
                trace!(routing_key = matched.routing_key, "Matched rate limit route");

                LimitContext {
                    routing_key: matched.routing_key.to_string(),
                    window_secs: route
                        .window_seconds
                        .or(defaults.window_seconds)
                        .unwrap_or(FALLBACK_WINDOW_SECS),
                    max_requests: route
                        .max_requests
                        .or(defaults.max_requests)
                        .unwrap_or(FALLBACK_MAX_REQUESTS),
                    admin_bypass: route
                        .admin_bypass
                        .or(defaults.admin_bypass)
                        .unwrap_or(false),
                    stop_on_outage: route
                        .stop_in_redis_down
                        .or(defaults.stop_in_redis_down)
                        .unwrap_or(method != "GET"),
                }
            }
            None => LimitContext {
                routing_key: format!("default:{}", normalize_path(path)),
                window_secs: defaults.window_seconds.unwrap_or(FALLBACK_WINDOW_SECS),
                max_requests: defaults.max_requests.unwrap_or(FALLBACK_MAX_REQUESTS),
                admin_bypass: defaults.admin_bypass.unwrap_or(false),
                stop_on_outage: defaults.stop_in_redis_down.unwrap_or(method != "GET"),
            },
        }
    }

    pub fn route_count(&self) -> usize {
        self.matcher.len()
    }
}
