pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod router;
pub mod store;

use crate::auth::BypassAuthority;
use crate::cache::CacheVersionStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{RedisConfig, SiteConfig};
use crate::error::{GateError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{admission_middleware, AdmissionGate};
use crate::store::{MemoryStore, RedisStore, SharedStore};
use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Long-lived components built from one configuration
pub struct SiteServices {
    pub store: Arc<dyn SharedStore>,
    pub gate: AdmissionGate,
    pub cache: Arc<CacheVersionStore>,
    /// Store health probe and local counter reaper, when running
    pub background: Vec<JoinHandle<()>>,
}

impl SiteServices {
    /// Connect the shared store and build the gate and cache on top of it.
    ///
    /// Background tasks are spawned here, so this must run inside a Tokio
    /// runtime.
    pub async fn build(config: &SiteConfig) -> Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn build_with_clock(config: &SiteConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut background = Vec::new();
        let store = connect_store(&config.redis, Arc::clone(&clock), &mut background).await?;

        let mut services = Self::with_store(config, store, clock)?;
        services.background.extend(background);
        Ok(services)
    }

    /// Build the gate and cache on an already connected store
    pub fn with_store(
        config: &SiteConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut background = Vec::new();

        let bypass = BypassAuthority::new(config.auth.as_ref(), Arc::clone(&store))?;
        let bypass = bypass.is_enabled().then_some(bypass);

        let gate = AdmissionGate::from_config(
            &config.rate_limiting,
            Arc::clone(&store),
            clock,
            bypass,
        )?;

        if let Some(secs) = config.rate_limiting.local_reaper_secs {
            background.push(Arc::clone(gate.local()).spawn_reaper(Duration::from_secs(secs)));
        }

        let cache = Arc::new(CacheVersionStore::from_config(
            &config.content_cache,
            Arc::clone(&store),
        ));

        Ok(Self {
            store,
            gate,
            cache,
            background,
        })
    }
}

async fn connect_store(
    config: &RedisConfig,
    clock: Arc<dyn Clock>,
    background: &mut Vec<JoinHandle<()>>,
) -> Result<Arc<dyn SharedStore>> {
    if config.is_memory() {
        info!("Using in-process shared store");
        return Ok(Arc::new(MemoryStore::with_clock(clock)));
    }

    let redis = Arc::new(RedisStore::connect(config).await?);
    background.push(redis.spawn_health_probe(Duration::from_secs(config.health_check_secs)));
    Ok(redis)
}

/// Axum state for the built-in endpoints
#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn SharedStore>,
    pub metrics: MetricsService,
}

/// Build the HTTP app: `/health` and `/metrics`, both behind admission control
pub fn build_app(gate: AdmissionGate, state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, admission_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Report shared store liveness
async fn health_handler(State(store): State<Arc<dyn SharedStore>>) -> impl IntoResponse {
    if store.is_available() {
        (StatusCode::OK, Json(json!({ "success": true, "store": "up" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "store": "down" })),
        )
    }
}

/// Initialize the sitegate server
pub async fn init_server(config: SiteConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting sitegate");

    let metrics = MetricsService::new()?;
    let services = SiteServices::build(&config).await?;

    let app = build_app(
        services.gate.clone(),
        AppState {
            store: Arc::clone(&services.store),
            metrics,
        },
    );

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GateError::Io)?;

    info!(%addr, "sitegate ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GateError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
