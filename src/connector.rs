//! Backing store connector.
//!
//! Owns the single shared connection to the backing store and its lifecycle:
//!
//! ```text
//! Disconnected --ensure_connected--> Connecting --ok--> Ready
//!      ^                                 |                 |
//!      +---- failure / timeout ----------+                 |
//!      |     (cooldown armed)                              |
//!      +---- connection-level error (no cooldown) ---------+
//! ```
//!
//! Each attempt runs in its own task bounded by `connect_timeout`. Callers
//! wait on it for at most `wait_timeout`, then carry on without the cache.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::store::Store;
use crate::stores::memory::{HashMapStore, HashMapStoreConfig};
use crate::stores::redis::RedisStore;

/// URL scheme selecting the in-process store.
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// Timing knobs for the connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// How long a caller waits for an in-flight attempt before bypassing the cache.
    pub wait_timeout: Duration,
    /// Delay after a failed attempt before another one may start.
    pub cooldown: Duration,
    /// Settings for the in-process store selected by `memory://`.
    pub memory_store: HashMapStoreConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            connect_timeout: Duration::from_secs(2),
            wait_timeout: Duration::from_millis(250),
            cooldown: Duration::from_secs(5),
            memory_store: HashMapStoreConfig::default(),
        }
    }
}

/// Opens a connection to a backing store.
#[async_trait]
pub trait Connect: Send + Sync {
    /// A name for tracing.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<Arc<dyn Store>, CacheError>;
}

/// Connects to Redis with a multiplexed connection.
pub struct RedisConnect {
    client: redis::Client,
}

impl RedisConnect {
    /// Validate the URL. No network I/O happens until `connect`.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::operation("redis", "", format!("Invalid Redis URL: {}", e)))?;
        Ok(RedisConnect { client })
    }
}

#[async_trait]
impl Connect for RedisConnect {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<Arc<dyn Store>, CacheError> {
        let store = RedisStore::connect(&self.client).await?;
        Ok(Arc::new(store))
    }
}

/// Hands out a store that already exists (in-process stores, tests).
pub struct StaticConnect {
    store: Arc<dyn Store>,
}

impl StaticConnect {
    pub fn new(store: Arc<dyn Store>) -> Self {
        StaticConnect { store }
    }
}

#[async_trait]
impl Connect for StaticConnect {
    fn name(&self) -> &'static str {
        self.store.name()
    }

    async fn connect(&self) -> Result<Arc<dyn Store>, CacheError> {
        Ok(self.store.clone())
    }
}

enum Phase {
    Disconnected { retry_after: Option<Instant> },
    Connecting { done: watch::Receiver<bool> },
    Ready { store: Arc<dyn Store>, generation: u64 },
}

struct Inner {
    backend: Option<Arc<dyn Connect>>,
    config: ConnectorConfig,
    phase: Mutex<Phase>,
    generations: AtomicU64,
}

impl Inner {
    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection_lost(&self, generation: u64, error: &CacheError) {
        let mut phase = self.phase();
        let current = matches!(&*phase, Phase::Ready { generation: g, .. } if *g == generation);
        if current {
            *phase = Phase::Disconnected { retry_after: None };
            drop(phase);
            tracing::warn!(
                generation,
                error = %error,
                "Backing store connection lost; cache bypassed until reconnected"
            );
        }
    }
}

/// Shared handle to the backing store connection.
///
/// Cloning is cheap; all clones observe the same connection state.
#[derive(Clone)]
pub struct StoreConnector {
    inner: Arc<Inner>,
}

impl StoreConnector {
    pub fn new(backend: Arc<dyn Connect>, config: ConnectorConfig) -> Self {
        Self::build(Some(backend), config)
    }

    /// A connector with no backend. It is never ready and never errors.
    pub fn disabled() -> Self {
        Self::build(None, ConnectorConfig::default())
    }

    /// Connector for an optional store URL.
    ///
    /// `memory://` selects an in-process [`HashMapStore`]; anything else is
    /// treated as a Redis URL. A missing or unparseable URL yields a disabled
    /// connector, so a misconfigured cache degrades to calling upstream directly.
    pub fn from_url(url: Option<&str>, config: ConnectorConfig) -> Self {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            tracing::info!("No backing store URL configured; response cache disabled");
            return Self::disabled();
        };

        if url.starts_with(MEMORY_URL_SCHEME) {
            tracing::info!("Using in-process backing store; entries are not shared across processes");
            let store: Arc<dyn Store> = Arc::new(HashMapStore::new(config.memory_store.clone()));
            return Self::new(Arc::new(StaticConnect::new(store)), config);
        }

        match RedisConnect::new(url) {
            Ok(backend) => Self::new(Arc::new(backend), config),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid backing store URL; response cache disabled");
                Self::disabled()
            }
        }
    }

    fn build(backend: Option<Arc<dyn Connect>>, config: ConnectorConfig) -> Self {
        StoreConnector {
            inner: Arc::new(Inner {
                backend,
                config,
                phase: Mutex::new(Phase::Disconnected { retry_after: None }),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Whether a backend is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.phase(), Phase::Ready { .. })
    }

    /// The connected store, if ready.
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        match &*self.inner.phase() {
            Phase::Ready { store, .. } => Some(store.clone()),
            _ => None,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Make sure a connection exists or is being established.
    ///
    /// Idempotent and safe to call concurrently: callers arriving while an
    /// attempt is in flight share it. The wait for an attempt is bounded by
    /// `wait_timeout`; during a cooldown this returns immediately.
    pub async fn ensure_connected(&self) {
        let mut done = {
            let mut phase = self.inner.phase();
            match &*phase {
                Phase::Ready { .. } => return,
                Phase::Connecting { done } => done.clone(),
                Phase::Disconnected { retry_after } => {
                    if retry_after.is_some_and(|deadline| Instant::now() < deadline) {
                        return;
                    }
                    let Some(backend) = self.inner.backend.clone() else {
                        return;
                    };

                    let (tx, rx) = watch::channel(false);
                    *phase = Phase::Connecting { done: rx.clone() };
                    drop(phase);

                    tracing::debug!(backend = backend.name(), "Connecting to backing store");
                    spawn_attempt(self.inner.clone(), backend, tx);
                    rx
                }
            }
        };

        let wait_timeout = self.inner.config.wait_timeout;
        let finished = tokio::time::timeout(wait_timeout, done.wait_for(|d| *d))
            .await
            .is_ok();

        if !finished {
            tracing::debug!(
                wait_ms = wait_timeout.as_millis() as u64,
                "Backing store still connecting; bypassing cache for this call"
            );
        }
    }
}

fn spawn_attempt(inner: Arc<Inner>, backend: Arc<dyn Connect>, done: watch::Sender<bool>) {
    tokio::spawn(async move {
        let started = Instant::now();
        let connect_timeout = inner.config.connect_timeout;
        let attempt = AssertUnwindSafe(backend.connect()).catch_unwind();

        let outcome = match tokio::time::timeout(connect_timeout, attempt).await {
            Ok(Ok(Ok(store))) => Ok(store),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(_)) => Err("connect attempt panicked".to_string()),
            Err(_) => Err(format!("connect attempt timed out after {:?}", connect_timeout)),
        };

        match outcome {
            Ok(store) => {
                let generation = inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
                let tracked: Arc<dyn Store> = Arc::new(TrackedStore {
                    inner: store,
                    generation,
                    connector: Arc::downgrade(&inner),
                });
                *inner.phase() = Phase::Ready {
                    store: tracked,
                    generation,
                };
                tracing::info!(
                    backend = backend.name(),
                    generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backing store connected"
                );
            }
            Err(reason) => {
                let cooldown = inner.config.cooldown;
                *inner.phase() = Phase::Disconnected {
                    retry_after: Some(Instant::now() + cooldown),
                };
                tracing::warn!(
                    backend = backend.name(),
                    error = %reason,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Backing store connect failed; cache bypassed during cooldown"
                );
            }
        }

        let _ = done.send(true);
    });
}

/// Store handed out while `Ready`. Reports connection-level errors back to
/// the connector so the next caller reconnects.
struct TrackedStore {
    inner: Arc<dyn Store>,
    generation: u64,
    connector: Weak<Inner>,
}

impl TrackedStore {
    fn observe<T>(&self, result: Result<T, CacheError>) -> Result<T, CacheError> {
        if let Err(e) = &result
            && e.is_connection()
            && let Some(connector) = self.connector.upgrade()
        {
            connector.connection_lost(self.generation, e);
        }
        result
    }
}

#[async_trait]
impl Store for TrackedStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.observe(self.inner.get(key).await)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.observe(self.inner.set_ex(key, value, ttl).await)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.observe(self.inner.set_nx_ex(key, value, ttl).await)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.observe(self.inner.del(key).await)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        self.observe(self.inner.del_if_eq(key, expected).await)
    }
}
