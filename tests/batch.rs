mod common;

use common::search_processor;
use resilience_core::batch::{BatchConfig, BatchSubmitter};
use resilience_core::resilience::circuit_breaker::CircuitBreakerConfig;
use resilience_core::resilience::BreakerRegistry;
use resilience_core::{Deadline, Error};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn breakers() -> BreakerRegistry {
    BreakerRegistry::new(CircuitBreakerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_five_queries_share_one_call_and_get_their_own_results() {
    let processor = search_processor(
        BatchConfig::new()
            .with_max_batch_size(5)
            .with_max_wait_time(Duration::from_secs(60)),
        &breakers(),
    );
    let queries = [
        json!({"q": "cats"}),
        json!({"q": "spam", "reject": true}),
        json!({"q": "dogs"}),
        json!({"q": "junk", "reject": true}),
        json!({"q": "owls"}),
    ];
    let results =
        futures::future::join_all(queries.map(|q| processor.submit(q, Deadline::none()))).await;

    assert_eq!(results[0].as_ref().unwrap(), &json!({"hits": ["cats"]}));
    assert!(matches!(results[1], Err(Error::Upstream { retryable: false, .. })));
    assert_eq!(results[2].as_ref().unwrap(), &json!({"hits": ["dogs"]}));
    assert!(matches!(results[3], Err(Error::Upstream { .. })));
    assert_eq!(results[4].as_ref().unwrap(), &json!({"hits": ["owls"]}));

    let stats = processor.stats();
    assert_eq!(stats.batches, 1);
    assert_eq!((stats.succeeded, stats.failed), (3, 2));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_submitters_are_split_by_size() {
    let processor = search_processor(
        BatchConfig::new()
            .with_max_batch_size(4)
            .with_max_wait_time(Duration::from_millis(30)),
        &breakers(),
    );
    let handles: Vec<_> = (0..10)
        .map(|n| {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .submit(json!({ "q": n }), Deadline::none())
                    .await
            })
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), json!({ "hits": [n] }));
    }

    let stats = processor.stats();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.succeeded, 10);
    assert_eq!(stats.batches, 3);
    assert_eq!(processor.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_pending_sends_a_partial_window() {
    let processor = search_processor(
        BatchConfig::new()
            .with_max_batch_size(10)
            .with_max_wait_time(Duration::from_secs(3600)),
        &breakers(),
    );
    let submitter = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.submit(json!({"q": "late"}), Deadline::none()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(processor.pending(), 1);

    processor.flush_pending().await;
    assert_eq!(
        submitter.await.unwrap().unwrap(),
        json!({"hits": ["late"]})
    );
}

#[tokio::test(start_paused = true)]
async fn test_json_submitter_is_object_safe() {
    let processor: Arc<dyn BatchSubmitter> = Arc::new(search_processor(
        BatchConfig::new().with_max_wait_time(Duration::from_millis(5)),
        &breakers(),
    ));
    let out = processor
        .submit_value(json!({"q": "fox"}), Deadline::none())
        .await
        .unwrap();
    assert_eq!(out, json!({"hits": ["fox"]}));
    assert_eq!(processor.upstream(), "image-search");
    assert_eq!(processor.stats().batches, 1);
}
