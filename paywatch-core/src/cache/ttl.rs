//! Keyed cache with a fixed time-to-live per entry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Thread-safe map whose entries expire `ttl` after they were written.
///
/// Expired entries are dropped lazily on the next write to the same key or
/// by [`TtlCache::purge_expired`].
///
/// Every invalidation bumps a generation counter. A reader that loads a value
/// from the backing store can fill with [`TtlCache::insert_if_generation`] so
/// a load that raced an invalidation is not cached.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (V, Instant)>>,
    ttl: Duration,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, if present and still fresh.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, written)) if written.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (value, Instant::now()));
    }

    /// Current invalidation generation. Read it before loading a value.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert only if nothing was invalidated since `generation` was read.
    /// Returns whether the value was cached.
    pub async fn insert_if_generation(&self, key: K, value: V, generation: u64) -> bool {
        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.insert(key, (value, Instant::now()));
        true
    }

    pub async fn invalidate(&self, key: &K) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(key);
    }

    pub async fn invalidate_many<'a>(&self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        for key in keys {
            entries.remove(key);
        }
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, written)| written.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Share of lookups served from the cache, 0.0 when nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_after_insert() {
        let cache = TtlCache::new(Duration::from_secs(10));
        assert!(cache.get(&1).await.is_none());
        cache.insert(1, "one").await;
        assert_eq!(cache.get(&1).await, Some("one"));
        cache.insert(1, "uno").await;
        assert_eq!(cache.get(&1).await, Some("uno"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(50));
        cache.insert("k", 100u64).await;
        assert_eq!(cache.get(&"k").await, Some(100));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cache.get(&"k").await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = TtlCache::new(Duration::from_secs(100));
        cache.insert(1, 42u64).await;
        let _ = cache.get(&1).await;
        let _ = cache.get(&1).await;
        let _ = cache.get(&1).await;
        let _ = cache.get(&2).await;

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { hits: 3, misses: 1 });
        assert!((stats.hit_rate() - 0.75).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(100));
        cache.insert(1, true).await;
        cache.insert(2, true).await;
        cache.invalidate(&1).await;
        assert!(cache.get(&1).await.is_none());
        cache.invalidate_many([&2]).await;
        assert!(cache.get(&2).await.is_none());
    }

    #[tokio::test]
    async fn test_fill_after_invalidation_is_skipped() {
        let cache = TtlCache::new(Duration::from_secs(100));
        let generation = cache.generation();
        cache.invalidate(&1).await;
        assert!(!cache.insert_if_generation(1, "stale", generation).await);
        assert!(cache.get(&1).await.is_none());

        let generation = cache.generation();
        assert!(cache.insert_if_generation(1, "fresh", generation).await);
        assert_eq!(cache.get(&1).await, Some("fresh"));
    }
}
