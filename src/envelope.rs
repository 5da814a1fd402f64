use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::CacheError;
use crate::policy::FreshnessWindow;
use crate::utils::{duration_ms, now_ms};

/// Current envelope schema version. Readers treat newer versions as a miss.
pub const ENVELOPE_VERSION: u32 = 1;

fn legacy_version() -> u32 {
    1
}

/// The value written to the backing store: fetched data plus the time it was fetched.
///
/// An envelope is always written whole with one `SET`, so readers never
/// observe a partially written value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Schema version of the envelope itself.
    #[serde(rename = "v", default = "legacy_version")]
    pub version: u32,

    /// Unix timestamp in milliseconds at which `data` was produced by the fetch callback.
    #[serde(rename = "cachedAt")]
    pub cached_at: i64,

    /// The cached value.
    pub data: T,
}

/// How an envelope relates to its freshness window at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `age <= fresh_for`: serve with no upstream activity.
    Fresh,
    /// `fresh_for < age <= stale_for`: serve and refresh in the background.
    Stale,
    /// `age > stale_for`: treat as a miss.
    Expired,
}

impl<T> Envelope<T> {
    /// Wrap freshly fetched data, stamped with the current time.
    pub fn new(data: T) -> Self {
        Self::with_cached_at(data, now_ms())
    }

    /// Wrap data with an explicit fetch timestamp.
    pub fn with_cached_at(data: T, cached_at: i64) -> Self {
        Envelope {
            version: ENVELOPE_VERSION,
            cached_at,
            data,
        }
    }

    /// Age of the envelope at `now_ms`.
    ///
    /// Clamped at zero: a writer whose clock runs ahead of ours reads as brand new.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.cached_at).max(0)
    }

    /// Classify the envelope against a freshness window.
    pub fn freshness(&self, now_ms: i64, window: &FreshnessWindow) -> Freshness {
        let age = self.age_ms(now_ms);
        if age <= duration_ms(window.fresh_for()) {
            Freshness::Fresh
        } else if age <= duration_ms(window.stale_for()) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self)
            .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Parse the JSON wire form.
    ///
    /// Envelopes written by a newer schema version are rejected so an old
    /// reader never misinterprets them.
    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        let envelope: Envelope<T> = serde_json::from_str(raw)
            .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))?;

        if envelope.version > ENVELOPE_VERSION {
            return Err(CacheError::Serialization(format!(
                "Unsupported envelope version {} (max {})",
                envelope.version, ENVELOPE_VERSION
            )));
        }

        Ok(envelope)
    }
}
