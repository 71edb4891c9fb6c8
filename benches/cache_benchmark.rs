use criterion::{criterion_group, criterion_main, Criterion};
use dcache::backend::InMemoryBackend;
use dcache::{CacheOptions, DistributedCache, LocalCache};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
struct Product {
    id: String,
    name: String,
    price: f64,
}

fn local_cache_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let cache = LocalCache::default();
    rt.block_on(cache.set("hot", r#"{"id":"1"}"#, Duration::from_secs(3600)));

    c.bench_function("local_get_hit", |b| {
        b.to_async(&rt).iter(|| async { cache.get("hot").await })
    });

    c.bench_function("local_set", |b| {
        b.to_async(&rt)
            .iter(|| async { cache.set("key", "value", Duration::from_secs(60)).await })
    });
}

fn facade_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let cache = rt
        .block_on(async { DistributedCache::new(InMemoryBackend::new(), CacheOptions::default()) })
        .expect("Failed to build cache");
    let product = Product {
        id: "p1".to_string(),
        name: "Widget".to_string(),
        price: 9.99,
    };

    c.bench_function("facade_set", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .set("product:p1", &product, Some(Duration::from_secs(60)))
                .await
        })
    });

    c.bench_function("facade_get_l1_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { cache.get::<Product>("product:p1").await })
    });
}

criterion_group!(benches, local_cache_benchmark, facade_benchmark);
criterion_main!(benches);
