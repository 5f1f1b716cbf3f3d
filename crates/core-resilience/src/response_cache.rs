//! Response cache for idempotent reads
//!
//! A keyed store of short-lived results. Entries are immutable once stored and
//! are only returned while younger than their TTL; expired entries are removed
//! lazily when looked up. An optional size bound and a background sweeper keep
//! memory in check for key spaces that are rarely revisited.
//!
//! # Example
//!
//! ```
//! use bulwark_core_resilience::{CacheConfig, ResponseCache};
//! use std::time::Duration;
//!
//! let cache = ResponseCache::new(CacheConfig::default());
//! cache.put("user:42", "alice".to_string(), Duration::from_secs(30));
//!
//! assert_eq!(cache.get("user:42"), Some("alice".to_string()));
//! assert_eq!(cache.get("user:43"), None);
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when a caller does not supply one
    pub default_ttl: Duration,
    /// Upper bound on stored entries; `None` means unbounded
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            max_entries: Some(10_000),
        }
    }
}

/// A cached value with its freshness window
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Concurrent TTL cache keyed by caller-supplied strings
#[derive(Debug)]
pub struct ResponseCache<V> {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a fresh entry; an expired entry is removed and reported as a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Store a value for `ttl`, replacing any previous entry
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();

        if let Some(max_entries) = self.config.max_entries {
            if self.entries.len() >= max_entries && !self.entries.contains_key(&key) {
                self.make_room(max_entries);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Store a value with the default TTL
    pub fn put_default(&self, key: impl Into<String>, value: V) {
        self.put(key, value, self.config.default_ttl);
    }

    /// Drop expired entries first, then the oldest entries, until a new entry fits
    fn make_room(&self, max_entries: usize) {
        self.purge_expired();

        while self.entries.len() >= max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Remove one entry
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Spawn a task that purges expired entries every `interval`
    ///
    /// The task stops once the last other reference to the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "swept expired cache entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: Option<usize>) -> ResponseCache<u32> {
        ResponseCache::new(CacheConfig {
            default_ttl: Duration::from_secs(5),
            max_entries,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl() {
        let cache = cache(None);
        cache.put("k", 7, Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(cache.get("k"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_miss_and_evicted() {
        let cache = cache(None);
        cache.put("k", 7, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_replaces_and_refreshes() {
        let cache = cache(None);
        cache.put("k", 1, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(800)).await;

        cache.put("k", 2, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(800)).await;

        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl() {
        let cache = cache(None);
        cache.put_default("k", 3);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("k"), Some(3));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_cache_evicts_expired_then_oldest() {
        let cache = cache(Some(2));
        cache.put("short", 1, Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.put("a", 2, Duration::from_secs(10));
        tokio::time::advance(Duration::from_millis(10)).await;

        // "short" has expired and goes first
        cache.put("b", 3, Duration::from_secs(10));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(2));

        // Full of fresh entries: the oldest ("a") is evicted
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.put("c", 4, Duration::from_secs(10));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(3));
        assert_eq!(cache.get("c"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(None);
        cache.put("a", 1, Duration::from_secs(1));
        cache.put("b", 2, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Arc::new(cache(None));
        cache.put("a", 1, Duration::from_secs(1));

        let sweeper = cache.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(sweeper.is_finished());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = cache(None);
        cache.put("a", 1, Duration::from_secs(60));
        cache.put("b", 2, Duration::from_secs(60));

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
