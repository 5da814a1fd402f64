use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::config::{CacheConfig, ConfigError};
use crate::connector::StoreConnector;
use crate::error::{CacheError, SwrError};
use crate::key::{Scalar, derive_key};
use crate::policy::FreshnessPolicy;
use crate::swr::SwrCache;

/// Response cache for one upstream API.
///
/// Combines key derivation, the freshness policy and the SWR orchestrator so
/// that an API client method only has to name its operation and parameters.
/// Operations the policy marks as uncacheable go straight to `fetch`.
#[derive(Clone)]
pub struct Cache {
    namespace: String,
    policy: Arc<FreshnessPolicy>,
    swr: SwrCache,
}

impl Cache {
    /// Create a cache from its parts.
    ///
    /// # Example
    /// ```ignore
    /// let connector = StoreConnector::from_url(Some("redis://localhost:6379"), ConnectorConfig::default());
    /// let cache = Cache::new("spoonacular", FreshnessPolicy::recipe_api(), SwrCache::new(connector));
    /// ```
    pub fn new(namespace: &str, policy: FreshnessPolicy, swr: SwrCache) -> Self {
        Cache {
            namespace: namespace.to_string(),
            policy: Arc::new(policy),
            swr,
        }
    }

    /// Build a cache from validated configuration. Does not connect yet.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let connector = StoreConnector::from_url(config.redis_url.as_deref(), config.connector_config());
        let swr = SwrCache::new(connector).with_lock_ttl(config.lock_ttl());
        Ok(Self::new(&config.namespace, config.freshness_policy()?, swr))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn swr(&self) -> &SwrCache {
        &self.swr
    }

    /// The key an operation with these parameters is cached under.
    pub fn key_for<I, K, V>(&self, operation_id: &str, params: I) -> Result<String, CacheError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        derive_key(&self.namespace, operation_id, params)
    }

    /// Serve `operation_id` through the cache according to the policy.
    ///
    /// # Example
    /// ```ignore
    /// let results: SearchResults = cache
    ///     .cached("/recipes/complexSearch", [("query", "pasta"), ("number", "10")], move || {
    ///         client.complex_search("pasta", 10)
    ///     })
    ///     .await?;
    /// ```
    pub async fn cached<T, E, F, Fut, I, K, V>(
        &self,
        operation_id: &str,
        params: I,
        fetch: F,
    ) -> Result<T, SwrError<E>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        let Some(window) = self.policy.window_for(operation_id) else {
            tracing::trace!(operation = %operation_id, "Operation not cacheable; calling upstream");
            return fetch().await.map_err(SwrError::Fetch);
        };

        let key = match self.key_for(operation_id, params) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(operation = %operation_id, error = %e, "Cannot derive cache key; calling upstream");
                return fetch().await.map_err(SwrError::Fetch);
            }
        };

        self.swr.get_or_refresh_with(&key, window, fetch).await
    }
}
