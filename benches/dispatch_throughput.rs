//! Benchmarks for dispatch overhead
//!
//! This benchmark measures:
//! - Cache key hashing
//! - The cache-hit path of `DispatchClient::call`
//! - Queue throughput against a zero-latency upstream

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use tokio::runtime::Runtime;

use ai_lib_dispatch::cache::CacheKeyGenerator;
use ai_lib_dispatch::{upstream_fn, CallOptions, ClientConfig, DispatchClientBuilder};
use serde_json::{json, Value};

fn bench_key_generation(c: &mut Criterion) {
    let keys = CacheKeyGenerator::new();
    let payload = json!({
        "messages": [
            {"role": "system", "content": "You are a helpful assistant."},
            {"role": "user", "content": "Summarize the following document in three bullet points."}
        ]
    });
    let mut params = BTreeMap::new();
    params.insert("temperature".to_string(), json!(0.2));
    params.insert("max_tokens".to_string(), json!(512));

    c.bench_function("cache_key_generate", |b| {
        b.iter(|| keys.generate(black_box("summarizer"), black_box(&payload), black_box(&params)))
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = DispatchClientBuilder::new(upstream_fn(|_req| async { Ok(json!("cached")) }))
        .build()
        .unwrap();
    rt.block_on(client.call("agent", "warm", CallOptions::new()))
        .unwrap();

    c.bench_function("call_cache_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let v = client.call("agent", "warm", CallOptions::new()).await.unwrap();
            black_box(v);
        })
    });
}

fn bench_queue_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_throughput");

    for concurrency in [1usize, 4, 16] {
        let config = ClientConfig::default()
            .with_cache_enabled(false)
            .with_max_concurrency(concurrency)
            .with_max_queue_depth(10_000);
        let client = DispatchClientBuilder::new(upstream_fn(|req| async move { Ok::<Value, _>(req.payload) }))
            .config(config)
            .build()
            .unwrap();

        group.throughput(Throughput::Elements(100));
        group.bench_with_input(
            BenchmarkId::new("uncached_calls_x100", concurrency),
            &client,
            |b, client| {
                b.to_async(&rt).iter(|| async {
                    let calls = (0..100).map(|i| client.call("agent", json!(i), CallOptions::new()));
                    for r in futures::future::join_all(calls).await {
                        black_box(r.unwrap());
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_key_generation, bench_cache_hit, bench_queue_throughput);
criterion_main!(benches);
