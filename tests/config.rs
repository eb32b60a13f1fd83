use resilience_core::config::ResilienceConfig;
use resilience_core::facade::ResilienceContext;
use resilience_core::resilience::rate_limiter::EndpointClass;
use resilience_core::store::StoreMode;
use resilience_core::Error;
use std::io::Write;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const YAML: &str = r#"
store:
  fallback_cooldown_ms: 5000
rate_limit:
  allowlist: ["user:ops"]
  policies:
    auth: { max_requests: 3, window_ms: 900000 }
    search: { max_requests: 120, window_ms: 60000 }
circuit_breaker:
  failure_threshold: 4
  reset_timeout_ms: 15000
  upstreams: [ai, image-search]
pool:
  min_size: 2
  max_size: 8
  fail_fast: true
batch:
  max_batch_size: 20
  max_wait_ms: 25
cache:
  ttl_secs: 120
  volatile_fields: [trace_id]
request:
  default_timeout_ms: 8000
"#;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_file_and_build_context() {
    let file = write_config(YAML);
    let cfg = assert_ok!(ResilienceConfig::load(file.path()));

    assert_eq!(cfg.default_timeout(), Duration::from_secs(8));
    assert!(cfg.rate_limiter_config().allowlist.contains("user:ops"));
    assert_eq!(cfg.batch_config().max_batch_size, 20);
    assert_eq!(cfg.pool_config().max_size, 8);

    let ctx = assert_ok!(ResilienceContext::from_config(cfg));
    assert_eq!(ctx.store().mode(), StoreMode::MemoryOnly);
    let limiter = ctx.limiter();
    assert_eq!(limiter.policy(EndpointClass::Auth).max_requests, 3);
    assert_eq!(limiter.policy(EndpointClass::Search).max_requests, 120);
    assert_eq!(
        limiter.policy(EndpointClass::AiGeneration),
        EndpointClass::AiGeneration.default_policy()
    );
    let mut names: Vec<String> = ctx
        .breakers()
        .snapshots()
        .into_iter()
        .map(|s| s.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["ai".to_string(), "image-search".to_string()]);
    assert_eq!(ctx.breaker("ai").config().failure_threshold, 4);

    let keys = ctx.key_generator();
    let a = keys.generate("search", &serde_json::json!({"q": "x", "trace_id": 1}));
    let b = keys.generate("search", &serde_json::json!({"q": "x", "trace_id": 2}));
    assert_eq!(a, b);
    ctx.shutdown();
}

#[test]
fn test_invalid_file_reports_field() {
    let file = write_config("pool:\n  min_size: 9\n  max_size: 2\n");
    match assert_err!(ResilienceConfig::load(file.path())) {
        Error::Configuration { context, .. } => {
            assert_eq!(context.field_path.as_deref(), Some("pool.min_size"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_missing_file_is_an_error() {
    assert_err!(ResilienceConfig::load("/nonexistent/resilience.yaml"));
}
