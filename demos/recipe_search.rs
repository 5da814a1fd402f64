//! Recipe search through the response cache.
//!
//! Runs against `MUNCH_CACHE_REDIS_URL` when set, otherwise against the
//! in-process store. Try `RUST_LOG=munch_cache=debug` to watch the cache work.

use munch_cache::{Cache, CacheConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RecipeSummary {
    id: u64,
    title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SearchResults {
    results: Vec<RecipeSummary>,
    total_results: u32,
}

/// Pretend upstream client: slow, and every request costs quota.
#[derive(Clone, Default)]
struct RecipeClient {
    requests: Arc<AtomicUsize>,
}

impl RecipeClient {
    async fn complex_search(&self, query: String, number: u32) -> Result<SearchResults, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let results = (0..number as u64)
            .map(|i| RecipeSummary {
                id: 600_000 + i,
                title: format!("{} #{}", query, i + 1),
            })
            .collect();
        Ok(SearchResults {
            results,
            total_results: 120,
        })
    }

    async fn random(&self) -> Result<RecipeSummary, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(RecipeSummary {
            id: 42,
            title: "Surprise stew".to_string(),
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn search(cache: &Cache, client: &RecipeClient, query: &str) -> Result<SearchResults, Box<dyn std::error::Error>> {
    let client = client.clone();
    let owned = query.to_string();
    let started = Instant::now();

    let results = cache
        .cached(
            "/recipes/complexSearch",
            [("query", query.to_string()), ("number", "3".to_string())],
            move || async move { client.complex_search(owned, 3).await },
        )
        .await?;

    info!(
        query,
        hits = results.results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Search finished"
    );
    Ok(results)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "munch_cache=info,recipe_search=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = CacheConfig::from_env()?;
    if config.redis_url.is_none() {
        config.redis_url = Some("memory://".to_string());
    }
    let cache = Cache::from_config(&config)?;
    let client = RecipeClient::default();

    // Miss: waits for upstream
    let first = search(&cache, &client, "pasta").await?;
    // Fresh hit: no upstream request
    search(&cache, &client, "pasta").await?;
    // Parameter order never matters for the key
    let reordered = cache.key_for("/recipes/complexSearch", [("number", "3"), ("query", "pasta")])?;
    let original = cache.key_for("/recipes/complexSearch", [("query", "pasta"), ("number", "3")])?;
    info!(same_key = reordered == original, key = %original, "Cache key");

    // Never cached
    let random_client = client.clone();
    let surprise = cache
        .cached("/recipes/random", [("number", 1)], move || async move { random_client.random().await })
        .await?;
    info!(title = %surprise.title, "Random recipe");

    cache.swr().refreshes().wait_idle().await;
    info!(
        upstream_requests = client.requests(),
        first_result = %first.results[0].title,
        refreshes = ?cache.swr().refreshes().stats(),
        "Done"
    );
    Ok(())
}
