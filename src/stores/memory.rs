use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::store::Store;
use crate::utils::{duration_ms, now_ms};

/// Default cap on the number of keys held by a [`HashMapStore`].
pub const DEFAULT_MAX_ITEMS: usize = 10_000;

/// Configuration for HashMapStore.
#[derive(Debug, Clone)]
pub struct HashMapStoreConfig {
    /// Evict on write once the map holds more than this many keys: expired keys
    /// first, then the soonest-expiring ones until 90% of the cap is left.
    ///
    /// `None` leaves expired keys in place until they are read.
    pub max_items: Option<usize>,
}

impl Default for HashMapStoreConfig {
    fn default() -> Self {
        HashMapStoreConfig {
            max_items: Some(DEFAULT_MAX_ITEMS),
        }
    }
}

/// Internal stored value with expiration time.
#[derive(Clone)]
struct StoredValue {
    expires: i64,
    value: String,
}

/// Thread-safe in-process store using HashMap with RwLock.
///
/// Mirrors the Redis command semantics the cache relies on, including an
/// atomic `SET NX`, so it can stand in for Redis in tests, benchmarks and
/// single-process development setups (`memory://`). Nothing is shared across
/// processes.
pub struct HashMapStore {
    state: RwLock<HashMap<String, StoredValue>>,
    max_items: Option<usize>,
}

impl HashMapStore {
    /// Create a new HashMapStore with the given configuration.
    pub fn new(config: HashMapStoreConfig) -> Self {
        HashMapStore {
            state: RwLock::new(HashMap::new()),
            max_items: config.max_items,
        }
    }

    /// Number of keys currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keep the map within `max_items`. `keep` is the key just written.
    fn evict(&self, state: &mut HashMap<String, StoredValue>, now: i64, keep: &str) {
        let Some(max_items) = self.max_items else {
            return;
        };
        if state.len() <= max_items {
            return;
        }

        // First delete all expired entries
        state.retain(|_, v| v.expires > now);

        // If still over max_items, remove the soonest-expiring entries
        if state.len() > max_items {
            let target = max_items - max_items / 10;
            let mut entries: Vec<(String, i64)> = state
                .iter()
                .filter(|(k, _)| k.as_str() != keep)
                .map(|(k, v)| (k.clone(), v.expires))
                .collect();
            entries.sort_by_key(|(_, expires)| *expires);

            let to_remove = state.len().saturating_sub(target.max(1));
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

impl Default for HashMapStore {
    fn default() -> Self {
        Self::new(HashMapStoreConfig::default())
    }
}

#[async_trait]
impl Store for HashMapStore {
    fn name(&self) -> &'static str {
        "hashmap"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let state = self.state.read().await;

        let Some(stored) = state.get(key) else {
            return Ok(None);
        };

        let now = now_ms();
        if stored.expires <= now {
            // Entry is expired, remove it
            drop(state);
            let mut state = self.state.write().await;
            if state.get(key).is_some_and(|v| v.expires <= now) {
                state.remove(key);
            }
            return Ok(None);
        }

        Ok(Some(stored.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;
        state.insert(
            key.to_string(),
            StoredValue {
                expires: now.saturating_add(duration_ms(ttl)),
                value: value.to_string(),
            },
        );
        self.evict(&mut state, now, key);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;

        if state.get(key).is_some_and(|v| v.expires > now) {
            return Ok(false);
        }

        state.insert(
            key.to_string(),
            StoredValue {
                expires: now.saturating_add(duration_ms(ttl)),
                value: value.to_string(),
            },
        );
        self.evict(&mut state, now, key);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.remove(key);
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;

        let matches = state
            .get(key)
            .is_some_and(|v| v.expires > now && v.value == expected);
        if matches {
            state.remove(key);
        }
        Ok(matches)
    }
}
