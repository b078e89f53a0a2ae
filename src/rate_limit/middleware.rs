use super::gate::AdmissionGate;
use super::types::{AdmissionDecision, AdmissionRequest, Verdict};
use crate::error::GateError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_STORE: &str = "x-ratelimit-store";

const MEMORY_FALLBACK: &str = "memory-fallback";

/// Axum middleware running every request through the [`AdmissionGate`]
///
/// Install with `axum::middleware::from_fn_with_state(gate, admission_middleware)`.
pub async fn admission_middleware(
    State(gate): State<AdmissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let admission = admission_request(&request);
    let decision = gate.check(&admission).await;

    match decision.verdict {
        Verdict::Bypass | Verdict::Allow => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Verdict::QuotaExceeded { retry_after } => {
            let mut response = GateError::QuotaExceeded { retry_after }.into_response();
            let headers = response.headers_mut();
            add_rate_limit_headers(headers, &decision);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
        Verdict::StoreUnavailable => {
            let mut response = GateError::BackendUnavailable(format!(
                "shared store down on strict route {}",
                decision.routing_key
            ))
            .into_response();
            add_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
    }
}

/// Set the quota headers for an admission-checked request.
///
/// Bypassed and refused requests were not counted, so they report the full
/// quota as remaining.
pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));

    if decision.is_degraded() {
        headers.insert(RATE_LIMIT_STORE, HeaderValue::from_static(MEMORY_FALLBACK));
    }
}

fn admission_request(request: &Request) -> AdmissionRequest {
    let headers = request.headers();
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path(), |pq| pq.as_str());

    let mut admission = AdmissionRequest::new(
        request.method().as_str(),
        path,
        client_identifier(headers, request.extensions().get::<ConnectInfo<SocketAddr>>()),
    );
    if let Some(token) = bearer_token(headers) {
        admission = admission.with_bearer(token);
    }
    admission
}

/// `X-Real-IP`, then the first `X-Forwarded-For` hop, then the peer address
pub fn client_identifier(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }

    if let Some(first_hop) = header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first_hop.to_string();
    }

    connect_info
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::BackendKind;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_client_identifier_precedence() {
        let peer = ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 4000));

        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, Some(&peer)), "10.0.0.9");
        assert_eq!(client_identifier(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_identifier(&headers, Some(&peer)), "203.0.113.7");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identifier(&headers, Some(&peer)), "198.51.100.2");
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut decision = AdmissionDecision {
            verdict: Verdict::Allow,
            routing_key: "GET:/tags".to_string(),
            limit: 100,
            remaining: 42,
            backend: Some(BackendKind::Shared),
        };

        let mut headers = HeaderMap::new();
        add_rate_limit_headers(&mut headers, &decision);
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "42");
        assert!(headers.get("X-RateLimit-Store").is_none());

        decision.backend = Some(BackendKind::Memory);
        add_rate_limit_headers(&mut headers, &decision);
        assert_eq!(headers.get("X-RateLimit-Store").unwrap(), "memory-fallback");
    }
}
