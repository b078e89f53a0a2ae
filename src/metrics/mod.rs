use crate::error::{GateError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

pub const ADMISSION_TOTAL: &str = "sitegate_admission_total";
pub const CACHE_LOOKUPS_TOTAL: &str = "sitegate_cache_lookups_total";
pub const CACHE_INVALIDATIONS_TOTAL: &str = "sitegate_cache_invalidations_total";

/// Prometheus exposition for the admission and cache counters
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the process-wide Prometheus recorder.
    ///
    /// Fails if a recorder is already installed.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GateError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A recorder that is not installed globally; renders nothing recorded
    /// through the `metrics` macros. For tests and embedding.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    fn register_metrics() {
        describe_counter!(
            ADMISSION_TOTAL,
            "Admission decisions by verdict and counting backend"
        );
        describe_counter!(
            CACHE_LOOKUPS_TOTAL,
            "Content cache lookups by result (hit, miss, not_found, error)"
        );
        describe_counter!(
            CACHE_INVALIDATIONS_TOTAL,
            "Content cache invalidations by outcome"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record one admission decision. `backend` is `none` when nothing was counted.
pub fn record_admission(verdict: &'static str, backend: &'static str) {
    counter!(ADMISSION_TOTAL, "verdict" => verdict, "backend" => backend).increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!(CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

pub fn record_cache_invalidation(outcome: &'static str) {
    counter!(CACHE_INVALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
}
