//! Shared utilities for the cache library.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Suffix appended to a cache key to form its refresh lock key.
pub const REFRESH_LOCK_SUFFIX: &str = ":refresh_lock";

/// Build the refresh lock key guarding background refreshes of `cache_key`.
///
/// Format: `{cache_key}:refresh_lock`
pub fn refresh_lock_key(cache_key: &str) -> String {
    format!("{}{}", cache_key, REFRESH_LOCK_SUFFIX)
}

/// Get the current time in milliseconds since UNIX epoch.
///
/// A clock set before the epoch reads as 0.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Convert a TTL to whole seconds for the store, rounding up.
///
/// Stores cannot express a zero TTL, so the minimum is 1 second.
pub fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Saturating conversion of a duration to milliseconds.
pub fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_lock_key() {
        let key = refresh_lock_key("spoonacular:abc123");
        assert_eq!(key, "spoonacular:abc123:refresh_lock");
    }

    #[test]
    fn test_now_ms_is_positive() {
        let now = now_ms();
        assert!(now > 0);
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(Duration::from_secs(30)), 30);
        assert_eq!(ttl_seconds(Duration::from_millis(30_001)), 31);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_secs(2)), 2_000);
        assert_eq!(duration_ms(Duration::MAX), i64::MAX);
    }
}
