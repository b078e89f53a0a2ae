//! Route table matching for rate limit rules
//!
//! Patterns use Express-style syntax: static segments, `:name` parameters
//! matching exactly one segment, and an optional trailing `*name` (or bare
//! `*`) wildcard matching the rest of the path. Every pattern is compiled to
//! an anchored regex once, when the table loads; requests only run the
//! precompiled matchers, in declaration order, and the first hit wins.

use crate::error::{GateError, Result};
use crate::rate_limit::types::RouteQuotaConfig;
use regex::Regex;
use std::collections::HashSet;

/// A compiled route table entry
#[derive(Debug, Clone)]
struct CompiledRoute {
    regex: Regex,
    /// Uppercased method, `None` for any
    method: Option<String>,
    routing_key: String,
    quota: RouteQuotaConfig,
}

/// Result of matching a request against the table
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    /// Position of the matched entry in the table
    pub index: usize,
    /// Identity of the matched rule, `<METHOD|*>:<pattern>`
    pub routing_key: &'a str,
    pub quota: &'a RouteQuotaConfig,
}

/// Ordered, precompiled route table
#[derive(Debug, Clone, Default)]
pub struct RoutePatternMatcher {
    routes: Vec<CompiledRoute>,
}

impl RoutePatternMatcher {
    /// Compile every route pattern.
    ///
    /// Any invalid pattern rejects the whole table.
    pub fn compile(routes: Vec<RouteQuotaConfig>) -> Result<Self> {
        let routes = routes
            .into_iter()
            .map(|quota| {
                let pattern = quota.match_rule.url.as_str();
                let regex = compile_pattern(pattern)?;
                let method = quota.match_rule.method.as_ref().map(|m| m.to_uppercase());
                let routing_key = format!(
                    "{}:{}",
                    method.as_deref().unwrap_or("*"),
                    normalize_path(pattern)
                );

                Ok(CompiledRoute {
                    regex,
                    method,
                    routing_key,
                    quota,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { routes })
    }

    /// Find the first route matching `method` and `path`.
    ///
    /// `method` is compared exactly against the stored uppercase method, so
    /// callers are expected to uppercase it first.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize_path(path);

        self.routes
            .iter()
            .enumerate()
            .find(|(_, route)| {
                route.method.as_deref().map_or(true, |m| m == method)
                    && route.regex.is_match(&path)
            })
            .map(|(index, route)| RouteMatch {
                index,
                routing_key: &route.routing_key,
                quota: &route.quota,
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Strip the query string and fragment, drop trailing slashes; the empty
/// path becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');

    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Translate one route pattern into an anchored regex
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let invalid = |reason: &str| {
        GateError::Config(format!("Invalid route pattern '{}': {}", pattern, reason))
    };

    if !pattern.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if pattern.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }

    let normalized = normalize_path(pattern);
    if normalized == "/" {
        return Regex::new("^/$").map_err(|e| invalid(&e.to_string()));
    }

    let segments: Vec<&str> = normalized[1..].split('/').collect();
    let mut names = HashSet::new();
    let mut source = String::from("^");

    for (position, segment) in segments.iter().enumerate() {
        let is_last = position + 1 == segments.len();

        if let Some(name) = segment.strip_prefix(':') {
            check_param_name(name).map_err(|reason| invalid(&reason))?;
            if !names.insert(name) {
                return Err(invalid(&format!("duplicate parameter ':{}'", name)));
            }
            source.push_str("/[^/]+");
        } else if let Some(name) = segment.strip_prefix('*') {
            if !is_last {
                return Err(invalid("wildcard must be the last segment"));
            }
            if !name.is_empty() {
                check_param_name(name).map_err(|reason| invalid(&reason))?;
                if !names.insert(name) {
                    return Err(invalid(&format!("duplicate parameter '*{}'", name)));
                }
            }
            source.push_str("(?:/.*)?");
        } else {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if segment.contains([':', '*']) {
                return Err(invalid(&format!(
                    "'{}' mixes literal text with a placeholder",
                    segment
                )));
            }
            source.push('/');
            source.push_str(&regex::escape(segment));
        }
    }

    source.push('$');
    Regex::new(&source).map_err(|e| invalid(&e.to_string()))
}

fn check_param_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("parameter name cannot be empty".to_string());
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("invalid parameter name '{}'", name));
    }
    Ok(())
}
