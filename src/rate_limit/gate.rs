use super::counter::CounterBackend;
use super::local::LocalCounter;
use super::resolver::LimitContextResolver;
use super::shared::SharedCounter;
use super::types::{
    AdmissionDecision, AdmissionRequest, BackendKind, CounterKey, CounterOutcome, LimitContext,
    Verdict,
};
use crate::auth::BypassAuthority;
use crate::clock::Clock;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::metrics;
use crate::observability::AUDIT_TARGET;
use crate::router::RoutePatternMatcher;
use crate::store::SharedStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-request admission control
///
/// Each check runs bypass check, backend health check, increment and
/// decision, in that order. Store faults never escape: they degrade to the
/// local counter or, on strict routes, to a 503 verdict.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    resolver: Arc<LimitContextResolver>,
    shared: SharedCounter,
    local: Arc<LocalCounter>,
    bypass: Option<BypassAuthority>,
}

impl AdmissionGate {
    pub fn new(
        resolver: LimitContextResolver,
        store: Arc<dyn SharedStore>,
        local: Arc<LocalCounter>,
        bypass: Option<BypassAuthority>,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            shared: SharedCounter::new(store),
            local,
            bypass,
        }
    }

    /// Build a gate from the rate limiting section.
    ///
    /// Malformed route entries are skipped; an invalid pattern is fatal.
    pub fn from_config(
        config: &RateLimitingConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        bypass: Option<BypassAuthority>,
    ) -> Result<Self> {
        let matcher = RoutePatternMatcher::compile(config.route_entries())?;
        let resolver = LimitContextResolver::new(matcher, config.default.clone());

        info!(
            routes = resolver.route_count(),
            "Rate limit route table loaded"
        );

        Ok(Self::new(
            resolver,
            store,
            Arc::new(LocalCounter::new(clock)),
            bypass,
        ))
    }

    /// The local fallback counters owned by this gate
    pub fn local(&self) -> &Arc<LocalCounter> {
        &self.local
    }

    pub async fn check(&self, request: &AdmissionRequest) -> AdmissionDecision {
        let context = self.resolver.resolve(&request.method, &request.path);

        if self.bypass_granted(&context, request).await {
            let decision = AdmissionDecision {
                verdict: Verdict::Bypass,
                routing_key: context.routing_key.clone(),
                limit: context.max_requests,
                remaining: context.max_requests,
                backend: None,
            };
            self.audit(request, &context, None, &decision);
            return decision;
        }

        let key = CounterKey::new(context.routing_key.clone(), request.client_id.clone());

        if self.shared.is_available() {
            let backend = CounterBackend::Shared(&self.shared);
            match backend.increment(&key, context.window_secs).await {
                Ok(outcome) => return self.decide(request, &context, backend.kind(), outcome),
                Err(e) => warn!(
                    routing_key = %context.routing_key,
                    error = %e,
                    "Shared counter increment failed, applying outage policy"
                ),
            }
        }

        if context.stop_on_outage {
            let decision = AdmissionDecision {
                verdict: Verdict::StoreUnavailable,
                routing_key: context.routing_key.clone(),
                limit: context.max_requests,
                remaining: context.max_requests,
                backend: None,
            };
            self.audit(request, &context, None, &decision);
            return decision;
        }

        let backend = CounterBackend::Local(&self.local);
        match backend.increment(&key, context.window_secs).await {
            Ok(outcome) => self.decide(request, &context, backend.kind(), outcome),
            Err(e) => {
                warn!(error = %e, "Local counter increment failed");
                AdmissionDecision {
                    verdict: Verdict::Allow,
                    routing_key: context.routing_key.clone(),
                    limit: context.max_requests,
                    remaining: context.max_requests,
                    backend: Some(BackendKind::Memory),
                }
            }
        }
    }

    async fn bypass_granted(&self, context: &LimitContext, request: &AdmissionRequest) -> bool {
        if !context.admin_bypass {
            return false;
        }
        let (Some(authority), Some(token)) = (&self.bypass, &request.bearer_token) else {
            return false;
        };

        let permitted = authority.permits(token).await;
        if !permitted {
            debug!(
                routing_key = %context.routing_key,
                "Admin bypass not granted, rate limiting applies"
            );
        }
        permitted
    }

    fn decide(
        &self,
        request: &AdmissionRequest,
        context: &LimitContext,
        backend: BackendKind,
        outcome: CounterOutcome,
    ) -> AdmissionDecision {
        let limit = context.max_requests;

        let verdict = if outcome.count > u64::from(limit) {
            Verdict::QuotaExceeded {
                retry_after: outcome.reset_after.clamp(1, context.window_secs.max(1)),
            }
        } else {
            Verdict::Allow
        };

        let remaining = u64::from(limit).saturating_sub(outcome.count) as u32;

        let decision = AdmissionDecision {
            verdict,
            routing_key: context.routing_key.clone(),
            limit,
            remaining,
            backend: Some(backend),
        };
        self.audit(request, context, Some(outcome.count), &decision);
        decision
    }

    fn audit(
        &self,
        request: &AdmissionRequest,
        context: &LimitContext,
        count: Option<u64>,
        decision: &AdmissionDecision,
    ) {
        let backend = decision.backend.map_or("none", |b| b.as_str());
        metrics::record_admission(decision.verdict.as_str(), backend);

        match decision.verdict {
            Verdict::StoreUnavailable => warn!(
                target: AUDIT_TARGET,
                routing_key = %context.routing_key,
                method = %request.method,
                client = %request.client_id,
                limit = context.max_requests,
                window_secs = context.window_secs,
                backend,
                verdict = decision.verdict.as_str(),
                "Shared store unavailable on strict route, request refused"
            ),
            _ => info!(
                target: AUDIT_TARGET,
                routing_key = %context.routing_key,
                method = %request.method,
                client = %request.client_id,
                count,
                limit = context.max_requests,
                window_secs = context.window_secs,
                backend,
                verdict = decision.verdict.as_str(),
                "Admission decision"
            ),
        }
    }
}
