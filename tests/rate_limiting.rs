mod common;

use common::{LogCapture, UnreachableStore};
use resilience_core::resilience::backoff::BackoffPolicy;
use resilience_core::resilience::rate_limiter::{
    EndpointClass, RateLimitKey, RateLimitPolicy, RateLimiter, RateLimiterConfig,
};
use resilience_core::store::{FallbackStore, MemoryStore, Store};
use resilience_core::utils::now_millis;
use std::sync::Arc;
use std::time::Duration;

fn limiter_with(policy: RateLimitPolicy) -> RateLimiter {
    RateLimiter::new(
        Arc::new(MemoryStore::new()),
        RateLimiterConfig::new().with_policy(EndpointClass::AiGeneration, policy),
    )
}

#[tokio::test]
async fn test_six_rapid_requests_against_limit_of_five() {
    let limiter = limiter_with(RateLimitPolicy::new(5, Duration::from_secs(60)));
    let key = RateLimitKey::new("user:7", EndpointClass::AiGeneration);

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let d = limiter.check(&key).await;
        assert!(d.allowed);
        remaining.push(d.remaining);
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let sixth = limiter.check(&key).await;
    assert!(!sixth.allowed);
    assert_eq!(sixth.remaining, 0);
    assert!(sixth.retry_after_ms.unwrap() > 0);
    assert!(sixth.reset_at_ms >= now_millis());
    let headers = sixth.headers();
    assert!(headers.iter().any(|(name, _)| *name == "Retry-After"));
}

#[tokio::test]
async fn test_concurrent_checks_admit_exactly_the_limit() {
    let limiter = Arc::new(limiter_with(RateLimitPolicy::new(10, Duration::from_secs(60))));
    let key = RateLimitKey::new("ip:198.51.100.9", EndpointClass::AiGeneration);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            tokio::spawn(async move { limiter.check(&key).await.allowed })
        })
        .collect();
    let mut allowed = 0;
    for h in handles {
        if h.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[tokio::test]
async fn test_identities_and_classes_are_independent() {
    let limiter = limiter_with(RateLimitPolicy::new(1, Duration::from_secs(60)));
    let a = RateLimitKey::new("user:a", EndpointClass::AiGeneration);
    let b = RateLimitKey::new("user:b", EndpointClass::AiGeneration);
    let a_search = RateLimitKey::new("user:a", EndpointClass::Search);

    assert!(limiter.check(&a).await.allowed);
    assert!(!limiter.check(&a).await.allowed);
    assert!(limiter.check(&b).await.allowed);
    assert!(limiter.check(&a_search).await.allowed);
}

#[tokio::test]
async fn test_repeat_offender_block_grows_monotonically() {
    let policy = RateLimitPolicy::new(1, Duration::from_secs(60)).with_backoff(
        BackoffPolicy::new()
            .with_violation_threshold(2)
            .with_base_block(Duration::from_millis(500))
            .with_max_block(Duration::from_secs(600)),
    );
    let limiter = limiter_with(policy);
    let key = RateLimitKey::new("ip:203.0.113.50", EndpointClass::AiGeneration);
    assert!(limiter.check(&key).await.allowed);

    let mut previous_until = 0;
    for n in 1..=8u32 {
        let d = limiter.check(&key).await;
        assert!(!d.allowed);
        let state = limiter.backoff_state(&key).await.unwrap();
        assert_eq!(state.consecutive_violations, n);
        let until = state.blocked_until_ms.unwrap_or(0);
        assert!(until >= previous_until);
        assert!(until <= now_millis() + 600_000);
        previous_until = until;
    }
    assert!(previous_until > now_millis());
}

#[tokio::test]
async fn test_allowlisted_identity_is_never_recorded() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(
        store.clone(),
        RateLimiterConfig::new()
            .with_policy(EndpointClass::Auth, RateLimitPolicy::new(1, Duration::from_secs(60)))
            .with_allowlisted("user:admin"),
    );
    let key = RateLimitKey::new("user:admin", EndpointClass::Auth);
    for _ in 0..20 {
        let d = limiter.check(&key).await;
        assert!(d.allowed && d.bypassed);
    }
    assert_eq!(store.window_count(), 0);
}

#[tokio::test]
async fn test_policy_can_be_retuned_at_runtime() {
    let limiter = limiter_with(RateLimitPolicy::new(1, Duration::from_secs(60)));
    let key = RateLimitKey::new("user:9", EndpointClass::AiGeneration);
    assert!(limiter.check(&key).await.allowed);
    assert!(!limiter.check(&key).await.allowed);

    limiter.update_policy(
        EndpointClass::AiGeneration,
        RateLimitPolicy::new(100, Duration::from_secs(60))
            .with_backoff(BackoffPolicy::new().with_violation_threshold(50)),
    );
    assert!(limiter.check(&key).await.allowed);
    assert_eq!(limiter.policy(EndpointClass::AiGeneration).max_requests, 100);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), RateLimiterConfig::new());
    let key = RateLimitKey::new("user:1", EndpointClass::Auth);
    for _ in 0..20 {
        let d = limiter.check(&key).await;
        assert!(d.allowed);
        assert!(d.degraded);
    }
}

#[tokio::test]
async fn test_fail_open_is_logged_as_security_event() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), RateLimiterConfig::new());
    let key = RateLimitKey::new("user:5", EndpointClass::Auth);

    assert!(limiter.check(&key).await.degraded);
    let out = logs.contents();
    assert!(out.contains("WARN"), "{out}");
    assert!(out.contains("failing open"), "{out}");
    assert!(out.contains("security_event=true"), "{out}");
    assert!(out.contains("identity=user:5"), "{out}");
}

#[tokio::test]
async fn test_fallback_store_keeps_limiting_in_memory() {
    let store = Arc::new(FallbackStore::new(
        Arc::new(UnreachableStore),
        MemoryStore::new(),
        Duration::from_secs(30),
    ));
    let limiter = RateLimiter::new(
        store.clone(),
        RateLimiterConfig::new()
            .with_policy(EndpointClass::Write, RateLimitPolicy::new(2, Duration::from_secs(60))),
    );
    let key = RateLimitKey::new("user:3", EndpointClass::Write);
    assert!(limiter.check(&key).await.allowed);
    assert!(limiter.check(&key).await.allowed);
    let third = limiter.check(&key).await;
    assert!(!third.allowed);
    assert!(!third.degraded);
    assert_eq!(store.fallback_count(), 1);
    assert!(store.ping().await.is_ok());
}
