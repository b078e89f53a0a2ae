use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use sitegate::auth::{AdminClaims, BypassAuthority};
use sitegate::clock::ManualClock;
use sitegate::config::SiteConfig;
use sitegate::rate_limit::{AdmissionGate, AdmissionRequest, BackendKind, Verdict};
use sitegate::store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
auth:
  jwt:
    secret: "integration-secret"
rate_limiting:
  default:
    windowSeconds: 60
    maxRequests: 5
  routes:
    - match: { url: "/guestbook", method: "POST" }
      windowSeconds: 600
      maxRequests: 3
      stopInRedisDown: true
    - match: { url: "/blog/:slug", method: "GET" }
      windowSeconds: 10
      maxRequests: 2
      adminBypass: true
    - match: { url: "/tags" }
      maxRequests: "lots"
"#;

struct TestGate {
    gate: AdmissionGate,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn setup_test_gate() -> TestGate {
    let config = SiteConfig::from_yaml(CONFIG).unwrap();
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));

    let bypass = BypassAuthority::new(config.auth.as_ref(), store.clone()).unwrap();
    let gate = AdmissionGate::from_config(
        &config.rate_limiting,
        store.clone(),
        clock.clone(),
        Some(bypass),
    )
    .unwrap();

    TestGate { gate, store, clock }
}

fn admin_token(secret: &str, role: &str) -> String {
    let claims = AdminClaims {
        sub: "owner".to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iss: None,
        aud: None,
        role: Some(role.to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_first_n_allowed_then_denied() {
    let t = setup_test_gate();
    let request = AdmissionRequest::new("GET", "/blog/hello", "203.0.113.7");

    for i in 0..2 {
        let decision = t.gate.check(&request).await;
        assert_eq!(decision.verdict, Verdict::Allow, "request {} should pass", i);
    }

    let denied = t.gate.check(&request).await;
    match denied.verdict {
        Verdict::QuotaExceeded { retry_after } => assert!(retry_after <= 10 && retry_after > 0),
        other => panic!("expected quota exceeded, got {:?}", other),
    }
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.limit, 2);
}

#[tokio::test]
async fn test_window_expiry_resets_to_one() {
    let t = setup_test_gate();
    let request = AdmissionRequest::new("GET", "/blog/hello", "203.0.113.7");

    for _ in 0..3 {
        t.gate.check(&request).await;
    }
    t.clock.advance(Duration::from_secs(10));

    let decision = t.gate.check(&request).await;
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.remaining, 1);
    assert_eq!(
        t.store
            .get("rate:GET:/blog/:slug:203.0.113.7")
            .await
            .unwrap(),
        Some("1".to_string())
    );
}

#[tokio::test]
async fn test_clients_do_not_share_counters() {
    let t = setup_test_gate();
    let alice = AdmissionRequest::new("GET", "/blog/hello", "198.51.100.1");
    let bob = AdmissionRequest::new("GET", "/blog/hello", "198.51.100.2");

    for _ in 0..3 {
        t.gate.check(&alice).await;
    }
    assert!(!t.gate.check(&alice).await.is_allowed());

    let decision = t.gate.check(&bob).await;
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_local_fallback_keeps_same_bound() {
    let t = setup_test_gate();
    t.store.set_available(false);
    let request = AdmissionRequest::new("GET", "/blog/hello", "203.0.113.7");

    for _ in 0..2 {
        let decision = t.gate.check(&request).await;
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.backend, Some(BackendKind::Memory));
    }

    let denied = t.gate.check(&request).await;
    assert!(matches!(denied.verdict, Verdict::QuotaExceeded { .. }));
    assert!(denied.is_degraded());

    t.clock.advance(Duration::from_secs(10));
    assert!(t.gate.check(&request).await.is_allowed());
}

#[tokio::test]
async fn test_strict_route_refuses_during_outage() {
    let t = setup_test_gate();
    t.store.set_available(false);
    let request = AdmissionRequest::new("POST", "/guestbook", "203.0.113.7");

    for _ in 0..10 {
        let decision = t.gate.check(&request).await;
        assert_eq!(decision.verdict, Verdict::StoreUnavailable);
        assert_eq!(decision.backend, None);
    }
    assert!(t.gate.local().is_empty());
}

#[tokio::test]
async fn test_unmatched_write_defaults_to_strict() {
    let t = setup_test_gate();
    t.store.set_available(false);

    let write = AdmissionRequest::new("DELETE", "/tags/rust", "203.0.113.7");
    assert_eq!(t.gate.check(&write).await.verdict, Verdict::StoreUnavailable);

    let read = AdmissionRequest::new("GET", "/tags/rust", "203.0.113.7");
    assert!(t.gate.check(&read).await.is_allowed());
}

#[tokio::test]
async fn test_store_recovery_returns_to_shared_backend() {
    let t = setup_test_gate();
    let request = AdmissionRequest::new("GET", "/about", "203.0.113.7");

    t.store.set_available(false);
    assert_eq!(
        t.gate.check(&request).await.backend,
        Some(BackendKind::Memory)
    );

    t.store.set_available(true);
    let decision = t.gate.check(&request).await;
    assert_eq!(decision.backend, Some(BackendKind::Shared));
    // Counts are not carried across backends.
    assert_eq!(decision.remaining, 4);
}

#[tokio::test]
async fn test_malformed_route_entry_is_skipped() {
    let t = setup_test_gate();

    // The `/tags` entry has a non-numeric quota, so the table default applies.
    let decision = t
        .gate
        .check(&AdmissionRequest::new("GET", "/tags", "203.0.113.7"))
        .await;
    assert_eq!(decision.routing_key, "default:/tags");
    assert_eq!(decision.limit, 5);
}

#[tokio::test]
async fn test_admin_bypass_skips_counting() {
    let t = setup_test_gate();
    let token = admin_token("integration-secret", "admin");
    let request = AdmissionRequest::new("GET", "/blog/hello", "203.0.113.7").with_bearer(&token);

    for _ in 0..5 {
        assert_eq!(t.gate.check(&request).await.verdict, Verdict::Bypass);
    }
    assert!(!t
        .store
        .exists("rate:GET:/blog/:slug:203.0.113.7")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_bypass_only_on_enabled_routes() {
    let t = setup_test_gate();
    let token = admin_token("integration-secret", "admin");
    let request = AdmissionRequest::new("GET", "/about", "203.0.113.7").with_bearer(&token);

    let decision = t.gate.check(&request).await;
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.backend, Some(BackendKind::Shared));
}

#[tokio::test]
async fn test_bypass_fails_open_into_rate_limiting() {
    let t = setup_test_gate();

    // Wrong role, then a revoked token: both are counted.
    let editor = admin_token("integration-secret", "editor");
    let request = AdmissionRequest::new("GET", "/blog/a", "203.0.113.7").with_bearer(&editor);
    assert_eq!(t.gate.check(&request).await.verdict, Verdict::Allow);

    let admin = admin_token("integration-secret", "admin");
    t.store
        .set_ex(&format!("auth:token:{}", admin), "1", 60)
        .await
        .unwrap();
    let request = AdmissionRequest::new("GET", "/blog/a", "203.0.113.7").with_bearer(&admin);
    assert_eq!(t.gate.check(&request).await.verdict, Verdict::Allow);
    assert!(matches!(
        t.gate.check(&request).await.verdict,
        Verdict::QuotaExceeded { .. }
    ));

    // Revocation list unreachable: never a bypass.
    t.store.set_available(false);
    let decision = t.gate.check(&request).await;
    assert_ne!(decision.verdict, Verdict::Bypass);
}

#[tokio::test]
async fn test_concurrent_checks_count_atomically() {
    let t = setup_test_gate();
    let gate = Arc::new(t.gate);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.check(&AdmissionRequest::new("GET", "/about", "203.0.113.7"))
                    .await
                    .is_allowed()
            })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn test_huge_window_does_not_panic() {
    let yaml = r#"
rate_limiting:
  default:
    windowSeconds: 18446744073709551615
    maxRequests: 1
"#;
    let config = SiteConfig::from_yaml(yaml).unwrap();
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let gate = AdmissionGate::from_config(&config.rate_limiting, store.clone(), clock, None).unwrap();
    let request = AdmissionRequest::new("GET", "/archive", "203.0.113.7");

    assert!(gate.check(&request).await.is_allowed());
    assert!(!gate.check(&request).await.is_allowed());

    store.set_available(false);
    assert!(gate.check(&request).await.is_allowed());
    assert!(!gate.check(&request).await.is_allowed());
}
