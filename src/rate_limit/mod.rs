//! Rate limiting module
//!
//! Per-route, per-client fixed-window admission control. Counters live in the
//! shared store (Redis) so every instance sees the same totals; while the store
//! is unreachable each request either falls back to an in-process counter or,
//! on routes marked `stopInRedisDown`, is refused with a 503.
//!
//! # Features
//!
//! - Ordered route table with Express-style patterns; first match wins
//! - Route override, table default and built-in fallback for every quota field
//! - Admin bypass for verified, unrevoked admin tokens
//! - Rate limit headers in responses (`X-RateLimit-*`)
//!
//! # Example
//!
//! ```rust,no_run
//! use sitegate::clock::SystemClock;
//! use sitegate::config::RateLimitingConfig;
//! use sitegate::rate_limit::{AdmissionGate, AdmissionRequest};
//! use sitegate::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = AdmissionGate::from_config(
//!         &RateLimitingConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(SystemClock),
//!         None,
//!     )
//!     .unwrap();
//!
//!     let decision = gate
//!         .check(&AdmissionRequest::new("GET", "/blog/hello", "203.0.113.7"))
//!         .await;
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod counter;
pub mod gate;
pub mod local;
pub mod middleware;
pub mod resolver;
pub mod shared;
pub mod types;

// Re-export commonly used types
pub use counter::CounterBackend;
pub use gate::AdmissionGate;
pub use local::{CounterRecord, LocalCounter};
pub use middleware::{add_rate_limit_headers, admission_middleware, client_identifier};
pub use resolver::LimitContextResolver;
pub use shared::SharedCounter;
pub use types::{
    AdmissionDecision, AdmissionRequest, BackendKind, CounterKey, CounterOutcome, LimitContext,
    QuotaDefaults, RouteQuotaConfig, Verdict,
};
