//! Supervision of detached background refreshes.
//!
//! A refresh is never awaited by the request that triggered it, so its result
//! would otherwise vanish. [`RefreshTracker`] spawns each refresh, catches
//! panics, logs the outcome and keeps counters. `wait_idle` lets shutdown
//! code drain in-flight refreshes.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// How a background refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new envelope was written.
    Refreshed,
    /// Another caller holds the refresh lock, or the entry was already refreshed.
    Skipped,
    /// The fetch callback failed; the stale envelope stays in place.
    FetchFailed(String),
    /// The fetch succeeded but the envelope could not be written.
    WriteFailed(String),
}

/// Snapshot of refresh counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub started: u64,
    pub refreshed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub panicked: u64,
    pub in_flight: usize,
}

struct TrackerInner {
    started: AtomicU64,
    refreshed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    in_flight: watch::Sender<usize>,
}

/// Spawns and accounts for background refresh tasks.
#[derive(Clone)]
pub struct RefreshTracker {
    inner: Arc<TrackerInner>,
}

impl RefreshTracker {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        RefreshTracker {
            inner: Arc::new(TrackerInner {
                started: AtomicU64::new(0),
                refreshed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                in_flight,
            }),
        }
    }

    /// Spawn a refresh for `key`. Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, key: String, task: F)
    where
        F: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let inner = self.inner.clone();
        inner.started.fetch_add(1, Ordering::Relaxed);
        inner.in_flight.send_modify(|n| *n += 1);

        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(RefreshOutcome::Refreshed) => {
                    inner.refreshed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "Background refresh stored new envelope");
                }
                Ok(RefreshOutcome::Skipped) => {
                    inner.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, "Background refresh skipped");
                }
                Ok(RefreshOutcome::FetchFailed(error)) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        key = %key,
                        error = %error,
                        "Background refresh fetch failed; stale envelope kept"
                    );
                }
                Ok(RefreshOutcome::WriteFailed(error)) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        key = %key,
                        error = %error,
                        "Background refresh could not store envelope"
                    );
                }
                Err(panic) => {
                    inner.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        key = %key,
                        panic = panic_message(panic.as_ref()),
                        "Background refresh panicked"
                    );
                }
            }

            inner.in_flight.send_modify(|n| *n -= 1);
        });
    }

    pub fn stats(&self) -> RefreshStats {
        let inner = &self.inner;
        RefreshStats {
            started: inner.started.load(Ordering::Relaxed),
            refreshed: inner.refreshed.load(Ordering::Relaxed),
            skipped: inner.skipped.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            panicked: inner.panicked.load(Ordering::Relaxed),
            in_flight: *inner.in_flight.borrow(),
        }
    }

    /// Wait until no refresh is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for RefreshTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let tracker = RefreshTracker::new();

        tracker.spawn("a".into(), async { RefreshOutcome::Refreshed });
        tracker.spawn("b".into(), async { RefreshOutcome::Skipped });
        tracker.spawn("c".into(), async {
            RefreshOutcome::FetchFailed("upstream 503".into())
        });
        tracker.spawn("d".into(), async {
            RefreshOutcome::WriteFailed("connection reset".into())
        });
        tracker.wait_idle().await;

        let stats = tracker.stats();
        assert_eq!(stats.started, 4);
        assert_eq!(stats.refreshed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let tracker = RefreshTracker::new();

        tracker.spawn("boom".into(), async {
            let outcome: Option<RefreshOutcome> = None;
            outcome.expect("fetch callback exploded")
        });
        tracker.wait_idle().await;

        let stats = tracker.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_slow_refresh() {
        let tracker = RefreshTracker::new();

        tracker.spawn("slow".into(), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            RefreshOutcome::Refreshed
        });
        assert_eq!(tracker.stats().in_flight, 1);

        tracker.wait_idle().await;
        assert_eq!(tracker.stats().refreshed, 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
