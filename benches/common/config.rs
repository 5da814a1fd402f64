use munch_cache::CacheConfig;
use munch_cache::config::ENV_REDIS_URL;

pub const ENV_UPSTREAM_LATENCY_MS: &str = "BENCH_UPSTREAM_LATENCY_MS";
pub const ENV_SAMPLE_SIZE: &str = "BENCH_SAMPLE_SIZE";

/// Benchmark settings.
///
/// The cache itself is configured exactly like a deployment, through the
/// `MUNCH_CACHE_*` variables, except that it falls back to `memory://`
/// so a bare `cargo bench` measures a working store.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub cache: CacheConfig,
    pub upstream_latency_ms: u64,
    pub sample_size: usize,
}

impl BenchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut cache = CacheConfig::from_lookup(&lookup).unwrap_or_else(|e| {
            eprintln!("  Ignoring invalid cache settings ({}); using defaults", e);
            CacheConfig::default()
        });
        if lookup(ENV_REDIS_URL).is_none() {
            cache.redis_url = Some("memory://".to_string());
        }

        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        BenchConfig {
            cache,
            upstream_latency_ms: number(ENV_UPSTREAM_LATENCY_MS, 50),
            sample_size: number(ENV_SAMPLE_SIZE, 100) as usize,
        }
    }

    pub fn print(&self) {
        eprintln!("Benchmark Configuration:");
        eprintln!("  Store: {}", self.cache.redis_url.as_deref().unwrap_or("none"));
        eprintln!("  Memory store cap: {} keys", self.cache.memory_max_items);
        eprintln!("  Upstream latency: {}ms", self.upstream_latency_ms);
        eprintln!("  Sample size: {}", self.sample_size);
    }
}
