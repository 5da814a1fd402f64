//! Store implementations for the cache library.

pub mod memory;
pub mod metrics;
pub mod redis;

pub use memory::{HashMapStore, HashMapStoreConfig};
pub use metrics::{CacheMetric, MetricsSink, MetricsStore, Outcome, StoreCommand, TracingSink};
pub use redis::{RedisStore, RedisStoreConfig};
