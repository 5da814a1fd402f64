//! Metrics middleware for cache stores.
//!
//! [`MetricsStore`] wraps any [`Store`] and reports one [`CacheMetric`] per
//! command to a [`MetricsSink`]. Lock traffic (`SET NX`) is reported apart
//! from envelope writes, so stampede protection can be watched directly.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use munch_cache::{HashMapStore, Store};
//! use munch_cache::stores::metrics::{MetricsStore, TracingSink};
//!
//! let inner: Arc<dyn Store> = Arc::new(HashMapStore::default());
//! let store: Arc<dyn Store> = Arc::new(MetricsStore::new(inner, Arc::new(TracingSink)));
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CacheError;
use crate::store::Store;

/// The store command a metric describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommand {
    Get,
    SetEx { ttl: Duration },
    /// Refresh lock acquisition.
    SetNxEx { ttl: Duration },
    Del,
    /// Refresh lock release.
    DelIfEq,
}

impl StoreCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreCommand::Get => "get",
            StoreCommand::SetEx { .. } => "set_ex",
            StoreCommand::SetNxEx { .. } => "set_nx_ex",
            StoreCommand::Del => "del",
            StoreCommand::DelIfEq => "del_if_eq",
        }
    }
}

/// What a command returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Acquired,
    NotAcquired,
    Done,
    Failed(String),
}

/// One store command as observed by [`MetricsStore`].
#[derive(Debug, Clone)]
pub struct CacheMetric {
    pub command: StoreCommand,
    pub key: String,
    pub outcome: Outcome,
    pub latency: Duration,
    /// Name of the wrapped store (from `Store::name()`).
    pub tier: &'static str,
}

impl CacheMetric {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Trait for receiving cache metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Called synchronously on every command; keep it cheap.
    fn emit(&self, metric: CacheMetric);

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Sink that turns every metric into a `trace` event.
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    fn emit(&self, metric: CacheMetric) {
        tracing::trace!(
            tier = metric.tier,
            command = metric.command.as_str(),
            key = %metric.key,
            outcome = ?metric.outcome,
            latency_ms = metric.latency_ms(),
            "store command"
        );
    }

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// A store wrapper that emits metrics for all operations.
pub struct MetricsStore {
    inner: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsStore {
    pub fn new(inner: Arc<dyn Store>, sink: Arc<dyn MetricsSink>) -> Self {
        MetricsStore { inner, sink }
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    fn record<T>(
        &self,
        command: StoreCommand,
        key: &str,
        started: Instant,
        result: &Result<T, CacheError>,
        outcome: impl FnOnce(&T) -> Outcome,
    ) {
        let outcome = match result {
            Ok(value) => outcome(value),
            Err(e) => Outcome::Failed(e.to_string()),
        };
        self.sink.emit(CacheMetric {
            command,
            key: key.to_string(),
            outcome,
            latency: started.elapsed(),
            tier: self.inner.name(),
        });
    }
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let started = Instant::now();
        let result = self.inner.get(key).await;
        self.record(StoreCommand::Get, key, started, &result, |value| {
            if value.is_some() { Outcome::Hit } else { Outcome::Miss }
        });
        result
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let started = Instant::now();
        let result = self.inner.set_ex(key, value, ttl).await;
        self.record(StoreCommand::SetEx { ttl }, key, started, &result, |_| Outcome::Done);
        result
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let started = Instant::now();
        let result = self.inner.set_nx_ex(key, value, ttl).await;
        self.record(StoreCommand::SetNxEx { ttl }, key, started, &result, |acquired| {
            if *acquired { Outcome::Acquired } else { Outcome::NotAcquired }
        });
        result
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let started = Instant::now();
        let result = self.inner.del(key).await;
        self.record(StoreCommand::Del, key, started, &result, |_| Outcome::Done);
        result
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let started = Instant::now();
        let result = self.inner.del_if_eq(key, expected).await;
        self.record(StoreCommand::DelIfEq, key, started, &result, |deleted| {
            if *deleted { Outcome::Done } else { Outcome::Miss }
        });
        result
    }
}
