//! Tests for `src/embedding/cache.rs` and the vector math helpers.

use std::sync::Arc;
use std::time::Duration;

use mnemon::embedding::cache::EmbeddingCache;
use mnemon::embedding::{dot, normalize, Embedder};

use crate::support::{test_vector, HashEmbedder};

const LONG_TTL: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn cache_hit_skips_the_provider() {
    let inner = Arc::new(HashEmbedder::new());
    let cache = EmbeddingCache::new(inner.clone(), LONG_TTL);

    let first = cache.embed("hello world").await.expect("embed should succeed");
    let second = cache.embed("hello world").await.expect("embed should succeed");

    assert_eq!(first, second, "cached vector must be identical");
    assert_eq!(inner.call_count(), 1, "second call must be served from cache");
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn expired_entries_fall_through_to_the_provider() {
    let inner = Arc::new(HashEmbedder::new());
    let cache = EmbeddingCache::new(inner.clone(), Duration::ZERO);

    cache.embed("short lived").await.expect("embed should succeed");
    cache.embed("short lived").await.expect("embed should succeed");

    assert_eq!(inner.call_count(), 2, "zero TTL must never serve from cache");
}

#[tokio::test]
async fn batch_coalesces_misses_and_reuses_hits() {
    let inner = Arc::new(HashEmbedder::new());
    let cache = EmbeddingCache::new(inner.clone(), LONG_TTL);

    cache.embed("alpha").await.expect("embed should succeed");
    assert_eq!(inner.call_count(), 1);

    let texts = vec!["alpha".to_owned(), "beta".to_owned(), "gamma".to_owned()];
    let vectors = cache
        .embed_batch(&texts)
        .await
        .expect("batch should succeed");

    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[0], test_vector("alpha"));
    assert_eq!(
        inner.call_count(),
        3,
        "only the two misses reach the provider"
    );

    // Everything is now cached.
    cache
        .embed_batch(&texts)
        .await
        .expect("batch should succeed");
    assert_eq!(inner.call_count(), 3);
}

#[tokio::test]
async fn empty_batch_is_a_noop() {
    let inner = Arc::new(HashEmbedder::new());
    let cache = EmbeddingCache::new(inner.clone(), LONG_TTL);

    let vectors = cache.embed_batch(&[]).await.expect("batch should succeed");
    assert!(vectors.is_empty());
    assert_eq!(inner.call_count(), 0);
}

#[test]
fn normalize_produces_unit_vectors() {
    let mut vector = vec![3.0_f32, 4.0, 0.0];
    normalize(&mut vector);
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((magnitude - 1.0).abs() < 1e-6);

    // Zero vectors stay untouched rather than dividing by zero.
    let mut zero = vec![0.0_f32; 4];
    normalize(&mut zero);
    assert!(zero.iter().all(|v| *v == 0.0));
}

#[test]
fn dot_on_unit_vectors_behaves_like_cosine() {
    let a = test_vector("the quick brown fox");
    let same = test_vector("the quick brown fox");
    let unrelated = test_vector("quarterly revenue projections");

    assert!((dot(&a, &same) - 1.0).abs() < 1e-5, "identical text scores 1");
    assert!(dot(&a, &unrelated) < 0.5, "unrelated text scores low");
}
