//! Exact-match result caching.
//!
//! `with_cache` wraps a compute call with a TTL memo keyed by a
//! deterministic hash of the logical request. Hits never invoke the compute
//! function; misses store the fresh value fire-and-forget so storage latency
//! and failures cannot touch the response path. A broken store degrades to
//! always computing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::background::BackgroundQueue;
use crate::error::Result;

/// Error raised by a cache store backend.
#[derive(Debug, thiserror::Error)]
#[error("cache store unavailable: {0}")]
pub struct CacheStoreError(pub String);

/// Keyed value store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheStoreError>;
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> std::result::Result<(), CacheStoreError>;
}

/// Entry stored in moka. Expiry is tracked per entry and checked on read.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: String,
    /// Expiration timestamp (millis since epoch)
    expires_at: u64,
}

/// In-process cache store backed by moka.
pub struct MemoryCacheStore {
    cache: MokaCache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: MokaCache::builder().max_capacity(capacity).build(),
        }
    }

    fn current_time_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheStoreError> {
        match self.cache.get(key).await {
            Some(entry) => {
                if Self::current_time_millis() >= entry.expires_at {
                    self.cache.remove(key).await;
                    Ok(None)
                } else {
                    Ok(Some(entry.data))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> std::result::Result<(), CacheStoreError> {
        let entry = CacheEntry {
            data: value,
            expires_at: Self::current_time_millis() + ttl.as_millis() as u64,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}

/// Value plus whether it came from the cache.
#[derive(Debug)]
pub struct CacheOutcome<T> {
    pub value: T,
    pub cached: bool,
}

/// TTL memo wrapper over a cache store.
pub struct CacheLayer {
    store: Option<Arc<dyn CacheStore>>,
    background: Arc<BackgroundQueue>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, background: Arc<BackgroundQueue>) -> Self {
        Self {
            store: Some(store),
            background,
        }
    }

    /// A layer with no backing store: every call computes.
    pub fn disabled(background: Arc<BackgroundQueue>) -> Self {
        Self {
            store: None,
            background,
        }
    }

    /// Return the cached value under `key`, or run `compute` and store the
    /// fresh value with the given TTL.
    ///
    /// The store write is detached: it goes through the background queue,
    /// is never awaited, and its failure never reaches the caller. A store
    /// read error falls back to computing without attempting the write.
    pub async fn with_cache<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<CacheOutcome<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let Some(store) = &self.store else {
            let value = compute().await?;
            return Ok(CacheOutcome {
                value,
                cached: false,
            });
        };

        match store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    return Ok(CacheOutcome {
                        value,
                        cached: true,
                    });
                }
                Err(e) => {
                    // Corrupt entry: treat as a miss
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache store error, falling back to compute");
                let value = compute().await?;
                return Ok(CacheOutcome {
                    value,
                    cached: false,
                });
            }
        }

        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(serialized) => {
                let store = store.clone();
                let key = key.to_string();
                self.background.submit("cache-write", async move {
                    store
                        .set(&key, serialized, ttl)
                        .await
                        .map_err(|e| format!("key '{}': {}", key, e))
                });
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize value for cache");
            }
        }

        Ok(CacheOutcome {
            value,
            cached: false,
        })
    }
}

/// Deterministic cache key over the active version id and variables.
///
/// Variables are sorted by name before hashing, so insertion order never
/// affects the key.
pub fn cache_key(version_id: &str, variables: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&str, &str> = variables
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let payload = serde_json::json!({
        "version": version_id,
        "vars": sorted,
    });

    let digest = Sha256::digest(payload.to_string().as_bytes());
    format!("exec:{}", hex::encode(digest))
}
