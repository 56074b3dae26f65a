//! Fixed-window request rate limiting.
//!
//! Counters live in a pluggable store keyed `ratelimit:<identifier>`. The
//! first increment in a window creates the counter with an expiry of the
//! window length; each subsequent increment is compared against the limit.
//! A store error fails open: the request is allowed and a warning is logged,
//! so the limiter never becomes an availability dependency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

/// Error raised by a counter store backend.
#[derive(Debug, thiserror::Error)]
#[error("counter store unavailable: {0}")]
pub struct CounterStoreError(pub String);

/// Atomic counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, creating it with the given window on first use or
    /// after expiry, and return the post-increment count.
    async fn incr(&self, key: &str, window: Duration) -> Result<u64, CounterStoreError>;
}

struct WindowSlot {
    count: u64,
    expires_at: tokio::time::Instant,
}

/// In-process counter store backed by DashMap.
///
/// The entry API holds the shard lock for the whole read-modify-write, so
/// increments are atomic under concurrent requests sharing an identifier.
#[derive(Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, WindowSlot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<u64, CounterStoreError> {
        let now = tokio::time::Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert(WindowSlot {
            count: 0,
            expires_at: now + window,
        });

        if now >= slot.expires_at {
            // Window rolled over: start a fresh one
            slot.count = 0;
            slot.expires_at = now + window;
        }

        slot.count += 1;
        Ok(slot.count)
    }
}

/// Fixed-window rate limiter over a counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Whether a request from `identifier` is allowed under `limit` requests
    /// per `window_seconds`.
    pub async fn allow(&self, identifier: &str, limit: u64, window_seconds: u64) -> bool {
        let key = format!("ratelimit:{}", identifier);
        let window = Duration::from_secs(window_seconds);

        match self.store.incr(&key, window).await {
            Ok(count) => count <= limit,
            Err(e) => {
                // Fail open: the limiter is not worth an outage
                tracing::warn!(identifier = %identifier, error = %e, "Rate limit store error, allowing request");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store that always errors, for fail-open verification.
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr(&self, _key: &str, _window: Duration) -> Result<u64, CounterStoreError> {
            Err(CounterStoreError("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));

        for _ in 0..5 {
            assert!(limiter.allow("key-a", 5, 60).await);
        }
    }

    #[tokio::test]
    async fn test_sixth_call_blocked() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));

        for _ in 0..5 {
            assert!(limiter.allow("key-a", 5, 60).await);
        }
        assert!(!limiter.allow("key-a", 5, 60).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover_allows_again() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));

        for _ in 0..5 {
            assert!(limiter.allow("key-a", 5, 60).await);
        }
        assert!(!limiter.allow("key-a", 5, 60).await);

        // Advance past the 60s window
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(limiter.allow("key-a", 5, 60).await);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));

        assert!(limiter.allow("key-a", 1, 60).await);
        assert!(!limiter.allow("key-a", 1, 60).await);

        // A different identifier has its own window
        assert!(limiter.allow("key-b", 1, 60).await);
    }

    #[tokio::test]
    async fn test_fails_open_on_store_error() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));

        // Every call errors in the store, every call is allowed
        for _ in 0..10 {
            assert!(limiter.allow("key-a", 1, 60).await);
        }
    }

    #[tokio::test]
    async fn test_concurrent_increments_share_window() {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new())));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.allow("shared", 10, 60).await }));
        }

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
