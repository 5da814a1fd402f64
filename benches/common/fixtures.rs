use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const CUISINES: [&str; 6] = ["italian", "mexican", "thai", "indian", "french", "greek"];

/// Search result payload for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchRecipe {
    pub id: u64,
    pub title: String,
    pub ready_in_minutes: u32,
    pub ingredients: Vec<String>,
}

impl BenchRecipe {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            title: format!("Recipe {}", id),
            ready_in_minutes: (id % 90) as u32 + 10,
            ingredients: (0..8).map(|i| format!("ingredient {}", i)).collect(),
        }
    }
}

/// One search query: `/recipes/complexSearch` parameters.
#[derive(Clone, Debug)]
pub struct Query {
    pub query: String,
    pub cuisine: &'static str,
    pub number: u32,
}

impl Query {
    pub fn params(&self) -> [(&'static str, String); 3] {
        [
            ("query", self.query.clone()),
            ("cuisine", self.cuisine.to_string()),
            ("number", self.number.to_string()),
        ]
    }
}

/// Simulated upstream recipe API with configurable latency
#[derive(Clone)]
pub struct FakeUpstream {
    latency_ms: u64,
    request_count: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn new(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn search(&self, query: &Query) -> Result<Vec<BenchRecipe>, String> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        // Simulate network latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        let seed = query.query.len() as u64;
        Ok((0..query.number as u64).map(|i| BenchRecipe::new(seed * 100 + i)).collect())
    }

    #[allow(dead_code)]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

/// Generate queries for different workload patterns
pub struct QueryGenerator {
    num_queries: usize,
}

impl QueryGenerator {
    pub fn new(num_queries: usize) -> Self {
        Self { num_queries }
    }

    fn query(i: usize) -> Query {
        Query {
            query: format!("dish {}", i),
            cuisine: CUISINES[i % CUISINES.len()],
            number: 10,
        }
    }

    /// Every distinct query once, in order
    pub fn sequential(&self) -> Vec<Query> {
        (0..self.num_queries).map(Self::query).collect()
    }

    /// Queries for a mixed workload (some hits, some misses)
    pub fn mixed(&self, hit_ratio: f64) -> Vec<Query> {
        let mut rng = rand::rng();
        let hot_query_count = ((self.num_queries as f64 * hit_ratio) as usize).max(1);

        (0..1000)
            .map(|_| {
                let i = if rng.random_bool(hit_ratio) || hot_query_count >= self.num_queries {
                    rng.random_range(0..hot_query_count)
                } else {
                    rng.random_range(hot_query_count..self.num_queries)
                };
                Self::query(i)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_upstream() {
        use super::{FakeUpstream, QueryGenerator};

        let upstream = FakeUpstream::new(1);
        let query = &QueryGenerator::new(1).sequential()[0];

        let results = upstream.search(query).await.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(upstream.request_count(), 1);
    }

    #[test]
    fn test_query_generator() {
        use super::QueryGenerator;

        let generator = QueryGenerator::new(100);

        let seq = generator.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0].query, "dish 0");

        let mixed = generator.mixed(0.8);
        assert_eq!(mixed.len(), 1000);
    }
}
