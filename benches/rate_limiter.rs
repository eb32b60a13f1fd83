//! Benchmarks for the hot admission path
//!
//! This benchmark measures:
//! - Rate-limit checks against the in-memory store (allowed and denied)
//! - Cache key generation for typical payloads
//! - Local-tier cache hits

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use resilience_core::cache::{CacheConfig, CacheKeyGenerator, TieredCache};
use resilience_core::resilience::rate_limiter::{
    EndpointClass, RateLimitKey, RateLimitPolicy, RateLimiter, RateLimiterConfig,
};
use resilience_core::store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime")
}

fn bench_limiter_check(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));

    // Large limit over a short window: every check is admitted.
    let roomy = RateLimiter::new(
        Arc::new(MemoryStore::new()),
        RateLimiterConfig::new().with_policy(
            EndpointClass::Default,
            RateLimitPolicy::new(u64::MAX / 2, Duration::from_secs(1)),
        ),
    );
    let key = RateLimitKey::new("user:bench", EndpointClass::Default);
    group.bench_function("check_allowed", |b| {
        b.to_async(&rt).iter(|| async { black_box(roomy.check(&key).await) })
    });

    let tight = RateLimiter::new(
        Arc::new(MemoryStore::new()),
        RateLimiterConfig::new()
            .with_policy(EndpointClass::Auth, RateLimitPolicy::new(1, Duration::from_secs(3600))),
    );
    let denied = RateLimitKey::new("ip:192.0.2.1", EndpointClass::Auth);
    group.bench_function("check_denied", |b| {
        b.to_async(&rt).iter(|| async { black_box(tight.check(&denied).await) })
    });

    let identities: Vec<RateLimitKey> = (0..1024)
        .map(|i| RateLimitKey::new(format!("user:{i}"), EndpointClass::Search))
        .collect();
    let spread = RateLimiter::new(Arc::new(MemoryStore::new()), RateLimiterConfig::new());
    let mut next = 0usize;
    group.bench_function("check_many_identities", |b| {
        b.to_async(&rt).iter(|| {
            next = (next + 1) % identities.len();
            let key = &identities[next];
            let spread = &spread;
            async move { black_box(spread.check(key).await) }
        })
    });

    group.finish();
}

fn bench_cache_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    let keys = CacheKeyGenerator::new();
    let small = json!({"prompt": "hello", "lang": "es", "request_id": "abc"});
    let nested = json!({
        "messages": (0..20).map(|i| json!({"role": "user", "content": format!("turn {i}"), "timestamp": i})).collect::<Vec<_>>(),
        "temperature": 0.7,
        "options": {"top_p": 0.9, "nonce": "x"},
    });

    for (name, payload) in [("small", &small), ("nested", &nested)] {
        group.bench_with_input(BenchmarkId::new("generate", name), payload, |b, p| {
            b.iter(|| black_box(keys.generate("generate", black_box(p))))
        });
    }
    group.finish();
}

fn bench_local_hit(c: &mut Criterion) {
    let rt = runtime();
    let cache = TieredCache::new(CacheConfig::new(), Arc::new(MemoryStore::new()));
    let key = CacheKeyGenerator::new().generate("search", &json!({"q": "owls"}));
    rt.block_on(async {
        let _ = cache.set(&key, &json!({"hits": ["owl.png"]}), None, &[]).await;
    });

    c.bench_function("cache_local_hit", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get(&key).await) })
    });
}

criterion_group!(benches, bench_limiter_check, bench_cache_keys, bench_local_hit);
criterion_main!(benches);
