//! Embedding client behavior against the mock server: cache correctness
//! under concurrency, LRU eviction, retry policy, and dimension probing.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{spawn_backends, test_config, EMBED_DIMS};
use recall::embedding::EmbeddingClient;
use recall::error::ErrorKind;
use recall::ops::OpsCounters;

fn client_with(config: recall::EngineConfig) -> (Arc<EmbeddingClient>, Arc<OpsCounters>) {
    let ops = Arc::new(OpsCounters::new());
    (Arc::new(EmbeddingClient::new(&config, ops.clone())), ops)
}

#[tokio::test]
async fn concurrent_embeds_hit_upstream_once() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));

    // Warm the cache, then hammer it concurrently
    let warm = client.embed("the exact same text").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 1);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..1000 {
        let client = client.clone();
        tasks.spawn(async move { client.embed("the exact same text").await.unwrap() });
    }
    let mut vectors = Vec::new();
    while let Some(result) = tasks.join_next().await {
        vectors.push(result.unwrap());
    }

    assert_eq!(vectors.len(), 1000);
    assert!(vectors.iter().all(|v| v[..] == warm[..]));
    // Still exactly one upstream call
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 1);

    let stats = client.cache_stats();
    assert_eq!(stats.hits, 1000);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn lru_eviction_at_capacity_plus_one() {
    let backends = spawn_backends().await;
    let mut config = test_config(&backends);
    config.embed_cache_size = 3;
    let (client, _ops) = client_with(config);

    client.embed("alpha").await.unwrap();
    client.embed("beta").await.unwrap();
    client.embed("gamma").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 3);

    // Touch "alpha" so "beta" is least recently used
    client.embed("alpha").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 3);

    // Capacity + 1 evicts "beta"
    client.embed("delta").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 4);

    // "beta" is gone (one more upstream call), "alpha" survived
    client.embed("beta").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 5);
    client.embed("alpha").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn transient_errors_retry_with_backoff() {
    let backends = spawn_backends().await;
    let (client, ops) = client_with(test_config(&backends));

    backends.embed_fail_remaining.store(2, Ordering::SeqCst);
    let vector = client.embed("eventually works").await.unwrap();
    assert_eq!(vector.len(), EMBED_DIMS);
    // Initial attempt + two retries
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 3);
    assert_eq!(ops.totals(recall::ops::OpsCategory::Embedding).successes, 1);
}

#[tokio::test]
async fn retries_exhausted_surface_transient_error() {
    let backends = spawn_backends().await;
    let (client, ops) = client_with(test_config(&backends));

    backends.embed_fail_remaining.store(10, Ordering::SeqCst);
    let err = client.embed("never works").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    // Initial attempt + embed_retries extra attempts, then give up
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 3);
    assert_eq!(ops.totals(recall::ops::OpsCategory::Embedding).failures, 1);
    assert_eq!(ops.recent_failures().len(), 1);
}

#[tokio::test]
async fn non_retryable_status_fails_fast() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));

    let err = client.embed("FAIL_EMBED immediately").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    // A 400 is not retried
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vectors_are_unit_length() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));

    let vector = client.embed("check the norm of this").await.unwrap();
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn dimension_probe_runs_once() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));

    assert_eq!(client.dimension().await.unwrap(), EMBED_DIMS);
    assert_eq!(client.dimension().await.unwrap(), EMBED_DIMS);
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_requests_only_fetch_misses() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));

    let solo = client.embed("cached ahead of time").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 1);

    let batch = client
        .embed_batch(&["cached ahead of time", "fresh one", "another fresh"])
        .await
        .unwrap();
    // One more call for the two misses
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 2);
    assert_eq!(batch.len(), 3);
    assert!(batch[0][..] == solo[..]);

    // Order matches input order
    let fresh = client.embed("fresh one").await.unwrap();
    assert_eq!(backends.embed_calls.load(Ordering::SeqCst), 2);
    assert!(batch[1][..] == fresh[..]);
}

#[tokio::test]
async fn availability_probe() {
    let backends = spawn_backends().await;
    let (client, _ops) = client_with(test_config(&backends));
    assert!(client.is_available().await);

    let mut dead = test_config(&backends);
    dead.embedding_url = "http://127.0.0.1:9/v1/embeddings".into();
    dead.embed_timeout_ms = 500;
    let (dead_client, _ops) = client_with(dead);
    assert!(!dead_client.is_available().await);
}
