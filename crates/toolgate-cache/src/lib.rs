//! Result cache with TTL and periodic pruning
//!
//! A process-local mapping from fingerprint keys to prior results, used
//! by the analysis subsystem to avoid repeating identical work. One
//! mutex guards the whole map; expected volume is modest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired_removed: u64,
}

/// Process-local TTL cache
pub struct ResultCache {
    entries: Mutex<HashMap<String, Entry>>,
    stats: Mutex<CacheStats>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Look up a key, dropping it on the spot if it has expired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let mut stats = self.stats.lock().await;

        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                stats.expired_removed += 1;
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Store a value with the given lifetime.
    pub async fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Remove all expired entries; returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
            self.stats.lock().await.expired_removed += removed as u64;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().await.clone();
        stats.total_items = self.entries.lock().await.len();
        stats
    }

    /// Run the periodic sweeper until cancellation.
    pub async fn run_sweeper(
        cache: std::sync::Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(interval_secs = interval.as_secs(), "Cache sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cache sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    cache.sweep_expired().await;
                }
            }
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get() {
        let cache = ResultCache::new();
        cache
            .set("analysis:abc", json!({"gap": false}), DEFAULT_TTL)
            .await;
        assert_eq!(cache.get("analysis:abc").await, Some(json!({"gap": false})));
        assert_eq!(cache.get("analysis:missing").await, None);
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = ResultCache::new();
        cache
            .set("short", json!(1), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("short").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.expired_removed, 1);
        assert_eq!(stats.total_items, 0);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = ResultCache::new();
        cache.set("a", json!(1), DEFAULT_TTL).await;
        cache.set("b", json!(2), DEFAULT_TTL).await;

        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);

        cache.clear().await;
        assert_eq!(cache.stats().await.total_items, 0);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let cache = ResultCache::new();
        cache.set("old", json!(1), Duration::from_millis(5)).await;
        cache.set("fresh", json!(2), DEFAULT_TTL).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = cache.sweep_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.get("fresh").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_ttl() {
        let cache = ResultCache::new();
        cache.set("k", json!(1), Duration::from_millis(5)).await;
        cache.set("k", json!(2), DEFAULT_TTL).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = ResultCache::new();
        cache.set("k", json!(1), DEFAULT_TTL).await;
        let _ = cache.get("k").await;
        let _ = cache.get("k").await;
        let _ = cache.get("absent").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }
}
