//! # Fallback Cache Accessor
//!
//! Cache contract consumed by the degradation coordinator's cache fallback
//! stage. The default implementation is an in-process moka cache; tests use
//! the hash-map-backed [`MemoryFallbackCache`].
//!
//! Values round-trip as `serde_json::Value` so the coordinator can cache
//! results of arbitrary serializable operations under one accessor.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Read/write contract for the cache fallback stage.
#[async_trait]
pub trait FallbackCache: Send + Sync {
    /// Fetch a live (non-expired) value for `key`.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

#[derive(Clone)]
struct CachedEntry {
    value: Value,
    expires_at: Instant,
}

/// Moka-backed in-process cache with per-entry TTL.
///
/// Moka's cache-level `time_to_live` acts as an upper bound; per-entry TTLs
/// shorter than the bound are enforced by storing the deadline with the entry
/// and checking it on read.
pub struct MokaFallbackCache {
    inner: moka::future::Cache<String, CachedEntry>,
}

impl MokaFallbackCache {
    /// At most this long in the cache regardless of the requested TTL.
    const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(Self::MAX_TTL)
                .build(),
        }
    }
}

impl Default for MokaFallbackCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl FallbackCache for MokaFallbackCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entry = self.inner.get(key).await?;
        if entry.expires_at <= Instant::now() {
            self.inner.invalidate(key).await;
            debug!(key, "fallback cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let ttl = ttl.min(Self::MAX_TTL);
        self.inner
            .insert(
                key.to_string(),
                CachedEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;
    }
}

/// Hash-map-backed cache for tests and single-threaded tooling.
#[derive(Default)]
pub struct MemoryFallbackCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryFallbackCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FallbackCache for MemoryFallbackCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.write().await.insert(
            key.to_string(),
            CachedEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryFallbackCache::new();
        let value = json!({"points": 120, "tier": "gold"});

        cache.set("k", value.clone(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(value));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_memory_cache_respects_ttl() {
        let cache = MemoryFallbackCache::new();
        cache.set("k", json!(1), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_moka_cache_round_trip() {
        let cache = MokaFallbackCache::new(16);
        let value = json!(["a", "b"]);

        cache.set("k", value.clone(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(value));
    }

    #[tokio::test]
    async fn test_moka_cache_expires_per_entry() {
        let cache = MokaFallbackCache::new(16);
        cache.set("short", json!(1), Duration::ZERO).await;
        cache.set("long", json!(2), Duration::from_secs(60)).await;

        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("long").await, Some(json!(2)));
    }
}
