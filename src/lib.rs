//! munch-cache - A stale-while-revalidate response cache for rate-limited upstream APIs
//!
//! This library sits between an API client and a remote recipe API:
//! - Deterministic cache keys from an operation id and its parameters
//! - A per-operation freshness policy (fresh window, stale window, or "never cache")
//! - Stale-while-revalidate reads with one background refresh per key
//! - A backing store connector that degrades to "no cache" instead of failing
//!
//! # Example
//!
//! ```ignore
//! use munch_cache::{Cache, CacheConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_env()?;
//!     let cache = Cache::from_config(&config)?;
//!
//!     let recipe: serde_json::Value = cache
//!         .cached("/recipes/716429/information", [("includeNutrition", false)], || async {
//!             fetch_recipe(716429).await
//!         })
//!         .await?;
//!
//!     // Drain background refreshes before exiting
//!     cache.swr().refreshes().wait_idle().await;
//!     Ok(())
//! }
//! ```

mod cache;
pub mod config;
pub mod connector;
pub mod envelope;
mod error;
pub mod key;
pub mod policy;
pub mod refresh;
mod store;
pub mod stores;
mod swr;
mod utils;

// Re-export public API
pub use cache::Cache;
pub use config::{CacheConfig, ConfigError};
pub use connector::{Connect, ConnectorConfig, RedisConnect, StaticConnect, StoreConnector};
pub use envelope::{Envelope, Freshness};
pub use error::{CacheError, SwrError};
pub use key::{Scalar, derive_key};
pub use policy::{FreshnessPolicy, FreshnessWindow, MatchKind, PolicyRule};
pub use refresh::{RefreshOutcome, RefreshStats, RefreshTracker};
pub use store::Store;
pub use stores::memory::{HashMapStore, HashMapStoreConfig};
pub use stores::redis::{RedisStore, RedisStoreConfig};
pub use swr::{DEFAULT_LOCK_TTL, LockOutcome, LockToken, SwrCache, acquire_refresh_lock, release_refresh_lock};
pub use utils::refresh_lock_key;
