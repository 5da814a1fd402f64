use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;

/// A store is the external key-value service holding envelopes and refresh locks.
///
/// Values are opaque strings (serialized envelopes or lock markers). Every
/// write carries an expiry: the store is responsible for evicting expired keys
/// on its own, which is how "too old" becomes a plain cache miss.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "hashmap"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// `GET key`. The response must be `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `SET key value EX ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// `SET key value NX EX ttl`. Returns `true` if the key was absent and is now set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// `DEL key`. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Delete `key` only if it currently holds `expected`, atomically.
    /// Returns `true` if the key was deleted.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError>;
}
