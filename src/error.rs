use std::time::Duration;

/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A store command failed for a reason other than the connection.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },
    /// The connection to the backing store is broken or could not be opened.
    #[error("[{tier}] connection error: {message}")]
    Connection { tier: String, message: String },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A key parameter cannot be canonicalized (e.g. a NaN float).
    #[error("parameter '{name}' cannot be used in a cache key: {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new connection error.
    pub fn connection(tier: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Connection {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the connection itself is gone.
    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection { .. })
    }
}

/// Error returned by [`SwrCache::get_or_refresh`](crate::SwrCache::get_or_refresh).
///
/// Store failures never show up here: the cache degrades to calling the
/// fetch callback instead. Only a misconfigured window or a failed
/// synchronous fetch reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum SwrError<E> {
    /// `stale_for` must be strictly longer than `fresh_for`.
    #[error("invalid freshness window: stale_for ({stale_for:?}) must exceed fresh_for ({fresh_for:?})")]
    InvalidWindow {
        fresh_for: Duration,
        stale_for: Duration,
    },
    /// The fetch callback failed and no cached data could be served.
    #[error("fetch failed: {0}")]
    Fetch(E),
}

impl<E> SwrError<E> {
    /// Return the fetch error, if that is what this is.
    pub fn into_fetch(self) -> Option<E> {
        match self {
            SwrError::Fetch(e) => Some(e),
            SwrError::InvalidWindow { .. } => None,
        }
    }

    pub fn is_invalid_window(&self) -> bool {
        matches!(self, SwrError::InvalidWindow { .. })
    }
}
