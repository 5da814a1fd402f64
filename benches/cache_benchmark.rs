use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use munch_cache::{Cache, derive_key};
use std::time::Duration;
use tokio::runtime::Runtime;

mod common;
use common::{BenchConfig, FakeUpstream, Query, QueryGenerator};

const SEARCH: &str = "/recipes/complexSearch";

/// Cache over the configured backing store, connected before measuring
async fn setup_cache(config: &BenchConfig) -> Cache {
    let cache = Cache::from_config(&config.cache).expect("invalid benchmark configuration");

    cache.swr().connector().ensure_connected().await;
    if !cache.swr().connector().is_ready() {
        eprintln!("  Backing store not ready; numbers measure the bypass path");
    }
    cache
}

async fn search(cache: &Cache, upstream: &FakeUpstream, query: &Query) {
    let upstream = upstream.clone();
    let owned = query.clone();
    let _ = black_box(
        cache
            .cached(SEARCH, query.params(), move || async move { upstream.search(&owned).await })
            .await,
    );
}

/// Benchmark 1: Key derivation (hashing and canonicalization only)
fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    let queries = QueryGenerator::new(100).sequential();

    for param_count in [1, 3, 10] {
        group.bench_with_input(
            BenchmarkId::new("params", param_count),
            &param_count,
            |b, &n| {
                let params: Vec<(String, String)> =
                    (0..n).map(|i| (format!("param{}", i), format!("value {}", i))).collect();
                b.iter(|| black_box(derive_key("spoonacular", SEARCH, params.clone())));
            },
        );
    }

    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("search_queries", |b| {
        b.iter(|| {
            for query in &queries {
                let _ = black_box(derive_key("spoonacular", SEARCH, query.params()));
            }
        });
    });

    group.finish();
}

/// Benchmark 2: Hot Cache (all fresh hits, pure cache read performance)
fn bench_hot_cache(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hot_cache");
    group.sample_size(config.sample_size);

    let upstream = FakeUpstream::new(config.upstream_latency_ms);

    for query_count in [100, 1000] {
        let queries = QueryGenerator::new(query_count).sequential();
        group.throughput(Throughput::Elements(query_count as u64));

        group.bench_with_input(
            BenchmarkId::new("fresh_hits", query_count),
            &query_count,
            |b, &_n| {
                let cache = rt.block_on(setup_cache(config));

                // Pre-populate cache
                rt.block_on(async {
                    for query in &queries {
                        search(&cache, &upstream, query).await;
                    }
                });

                b.to_async(&rt).iter(|| async {
                    for query in &queries {
                        search(&cache, &upstream, query).await;
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark 3: Mixed Workload (80% hits, 20% misses - realistic)
fn bench_mixed_workload(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("mixed_workload");
    group.sample_size(config.sample_size.min(20)); // Fewer samples due to upstream latency
    group.measurement_time(Duration::from_secs(30));

    let upstream = FakeUpstream::new(config.upstream_latency_ms);
    let generator = QueryGenerator::new(500);

    // Create the cache ONCE before the benchmark loop
    let cache = rt.block_on(setup_cache(config));

    group.bench_function("recipe_search", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            let upstream = upstream.clone();
            let queries = generator.mixed(0.8);
            async move {
                for query in queries.iter().take(50) {
                    search(&cache, &upstream, query).await;
                }
            }
        });
    });

    group.finish();
    rt.block_on(cache.swr().refreshes().wait_idle());
}

fn run_benchmarks(c: &mut Criterion) {
    let config = BenchConfig::from_env();
    config.print();

    eprintln!("\n=== Running Benchmarks ===\n");

    bench_key_derivation(c);
    bench_hot_cache(c, &config);
    bench_mixed_workload(c, &config);
}

criterion_group!(benches, run_benchmarks);
criterion_main!(benches);
