use futures::FutureExt;
use serde::de::IgnoredAny;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::connector::StoreConnector;
use crate::envelope::{Envelope, Freshness};
use crate::error::{CacheError, SwrError};
use crate::policy::FreshnessWindow;
use crate::refresh::{RefreshOutcome, RefreshTracker, panic_message};
use crate::store::Store;
use crate::utils::{now_ms, refresh_lock_key};

/// Default expiry of a refresh lock. Independent of any cache TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Value stored under a refresh lock, unique to the caller that took it.
///
/// Release only deletes the lock while it still holds this token, so a
/// refresher that outlived its lock cannot drop a successor's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        LockToken(format!(
            "{}:{}:{}",
            std::process::id(),
            now_ms(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of trying to take the refresh lock for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// This caller now owns the refresh.
    Acquired(LockToken),
    /// Someone else is refreshing, or the store could not be asked.
    NotAcquired,
}

/// Result of reading an envelope.
enum Lookup<T> {
    Fresh(T),
    Stale(T),
    Miss,
}

/// Try to take the refresh lock guarding `cache_key` (`SET NX EX`).
///
/// A store error counts as [`LockOutcome::NotAcquired`]: without the lock
/// nobody refreshes, and the next stale reader tries again.
pub async fn acquire_refresh_lock(store: &dyn Store, cache_key: &str, ttl: Duration) -> LockOutcome {
    let lock_key = refresh_lock_key(cache_key);
    let token = LockToken::generate();
    match store.set_nx_ex(&lock_key, token.as_str(), ttl).await {
        Ok(true) => LockOutcome::Acquired(token),
        Ok(false) => LockOutcome::NotAcquired,
        Err(e) => {
            tracing::warn!(key = %cache_key, error = %e, "Could not take refresh lock");
            LockOutcome::NotAcquired
        }
    }
}

/// Release the refresh lock if `token` still owns it.
///
/// Failure is harmless: the lock expires on its own.
pub async fn release_refresh_lock(store: &dyn Store, cache_key: &str, token: &LockToken) {
    match store.del_if_eq(&refresh_lock_key(cache_key), token.as_str()).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(key = %cache_key, "Refresh lock expired before release");
        }
        Err(e) => {
            tracing::debug!(key = %cache_key, error = %e, "Could not release refresh lock; it will expire");
        }
    }
}

/// Stale-while-revalidate orchestrator.
///
/// Decides per call whether to serve cached data, serve it and refresh in the
/// background, or fetch synchronously. The backing store is strictly an
/// optimization: when it is down every call simply awaits `fetch`.
#[derive(Clone)]
pub struct SwrCache {
    connector: StoreConnector,
    lock_ttl: Duration,
    refreshes: RefreshTracker,
}

impl SwrCache {
    /// Create a new SWR cache on top of a connector.
    pub fn new(connector: StoreConnector) -> Self {
        SwrCache {
            connector,
            lock_ttl: DEFAULT_LOCK_TTL,
            refreshes: RefreshTracker::new(),
        }
    }

    /// Override the refresh lock expiry.
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn connector(&self) -> &StoreConnector {
        &self.connector
    }

    /// Tracker for background refreshes started by this cache.
    pub fn refreshes(&self) -> &RefreshTracker {
        &self.refreshes
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Stale-while-revalidate: get the cached value or load it with `fetch`.
    ///
    /// - fresh hit: return it, nothing else happens
    /// - stale hit: return it, refresh in the background under the refresh lock
    /// - miss, expired entry or store unavailable: await `fetch`, store the result, return it
    ///
    /// Rejects `stale_for <= fresh_for` before any I/O. Errors from `fetch`
    /// reach the caller only on the synchronous path.
    ///
    /// # Example
    /// ```ignore
    /// let recipe = cache
    ///     .get_or_refresh(&key, Duration::from_secs(3600), Duration::from_secs(7200), move || {
    ///         client.recipe_information(42)
    ///     })
    ///     .await?;
    /// ```
    pub async fn get_or_refresh<T, E, F, Fut>(
        &self,
        key: &str,
        fresh_for: Duration,
        stale_for: Duration,
        fetch: F,
    ) -> Result<T, SwrError<E>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let window = FreshnessWindow::new(fresh_for, stale_for).ok_or(SwrError::InvalidWindow {
            fresh_for,
            stale_for,
        })?;
        self.get_or_refresh_with(key, window, fetch).await
    }

    /// Same as [`get_or_refresh`](Self::get_or_refresh) with an already validated window.
    pub async fn get_or_refresh_with<T, E, F, Fut>(
        &self,
        key: &str,
        window: FreshnessWindow,
        fetch: F,
    ) -> Result<T, SwrError<E>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.connector.ensure_connected().await;

        if let Some(store) = self.connector.store() {
            match lookup::<T>(store.as_ref(), key, &window).await {
                Lookup::Fresh(data) => return Ok(data),
                Lookup::Stale(data) => {
                    self.spawn_refresh(store, key, window, fetch);
                    return Ok(data);
                }
                Lookup::Miss => {}
            }
        } else {
            tracing::trace!(key = %key, "Backing store not ready; bypassing cache");
        }

        let data = fetch().await.map_err(SwrError::Fetch)?;

        // The read may have dropped the connection; only write if still ready.
        if let Some(store) = self.connector.store() {
            let encoded = encode_envelope(&data);
            if let Err(e) = write_envelope(store.as_ref(), key, encoded, window.stale_for()).await {
                tracing::warn!(key = %key, error = %e, "Failed to cache fetched value");
            }
        }

        Ok(data)
    }

    /// Delete a cached entry. Returns `false` if the store is unavailable or the delete failed.
    pub async fn remove(&self, key: &str) -> bool {
        self.connector.ensure_connected().await;
        let Some(store) = self.connector.store() else {
            return false;
        };

        match store.del(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to remove cached entry");
                false
            }
        }
    }

    /// Spawn a background revalidation task.
    fn spawn_refresh<T, E, F, Fut>(
        &self,
        store: Arc<dyn Store>,
        key: &str,
        window: FreshnessWindow,
        fetch: F,
    ) where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let lock_ttl = self.lock_ttl;
        let key = key.to_string();

        self.refreshes.spawn(key.clone(), async move {
            let LockOutcome::Acquired(token) = acquire_refresh_lock(store.as_ref(), &key, lock_ttl).await
            else {
                return RefreshOutcome::Skipped;
            };

            // A refresh may have finished between our read and taking the lock.
            if is_fresh(store.as_ref(), &key, &window).await {
                release_refresh_lock(store.as_ref(), &key, &token).await;
                return RefreshOutcome::Skipped;
            }

            // A panicking fetch must not leave the lock held until it expires.
            let fetched = AssertUnwindSafe(async move { fetch().await }).catch_unwind().await;
            let outcome = match fetched {
                Ok(Ok(data)) => {
                    let encoded = encode_envelope(&data);
                    match write_envelope(store.as_ref(), &key, encoded, window.stale_for()).await {
                        Ok(()) => RefreshOutcome::Refreshed,
                        Err(e) => RefreshOutcome::WriteFailed(e.to_string()),
                    }
                }
                Ok(Err(e)) => RefreshOutcome::FetchFailed(e.to_string()),
                Err(panic) => {
                    RefreshOutcome::FetchFailed(format!("fetch panicked: {}", panic_message(panic.as_ref())))
                }
            };

            release_refresh_lock(store.as_ref(), &key, &token).await;
            outcome
        });
    }
}

/// Read and classify the envelope for `key`. Anything unusable is a miss.
async fn lookup<T: DeserializeOwned>(store: &dyn Store, key: &str, window: &FreshnessWindow) -> Lookup<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Lookup::Miss,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed; fetching directly");
            return Lookup::Miss;
        }
    };

    let envelope: Envelope<T> = match Envelope::decode(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Unreadable cached envelope; treating as miss");
            return Lookup::Miss;
        }
    };

    match envelope.freshness(now_ms(), window) {
        Freshness::Fresh => Lookup::Fresh(envelope.data),
        Freshness::Stale => Lookup::Stale(envelope.data),
        // Normally evicted by the store TTL already; reachable under clock skew.
        Freshness::Expired => Lookup::Miss,
    }
}

/// Whether the stored envelope for `key` is currently fresh, without decoding its data.
async fn is_fresh(store: &dyn Store, key: &str, window: &FreshnessWindow) -> bool {
    match store.get(key).await {
        Ok(Some(raw)) => Envelope::<IgnoredAny>::decode(&raw)
            .is_ok_and(|envelope| envelope.freshness(now_ms(), window) == Freshness::Fresh),
        _ => false,
    }
}

/// Stamp `data` with the current time and serialize it.
fn encode_envelope<T: Serialize>(data: &T) -> Result<String, CacheError> {
    Envelope::new(data).encode()
}

/// Write a whole envelope with TTL `stale_for`.
///
/// Takes the encoded form so no borrow of the data is held across the write.
async fn write_envelope(
    store: &dyn Store,
    key: &str,
    encoded: Result<String, CacheError>,
    stale_for: Duration,
) -> Result<(), CacheError> {
    store.set_ex(key, &encoded?, stale_for).await
}
