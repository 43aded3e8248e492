//! Per-process TTL+LRU caches keyed by workspace. Constructed once at
//! process start and injected into the services that need them.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_entries: 1000,
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_used: Instant,
}

/// TTL cache with LRU eviction once `max_entries` is reached.
pub struct TtlCache<K, V> {
    config: CacheConfig,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.config.ttl,
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key).unwrap();
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            Self::evict_one(&mut entries, self.config.ttl);
        }
        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Drop one expired entry if any exists, otherwise the least recently
    /// used one.
    fn evict_one(entries: &mut HashMap<K, Entry<V>>, ttl: Duration) {
        let expired: Option<K> = entries
            .iter()
            .find(|(_, e)| e.inserted_at.elapsed() > ttl)
            .map(|(k, _)| k.clone());
        let victim = expired.or_else(|| {
            entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
        });
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache: TtlCache<String, String> = TtlCache::new(CacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 10,
        });
        cache.insert("k".to_string(), "v".to_string()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&"k".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn lru_eviction_at_capacity() {
        let cache: TtlCache<u32, u32> = TtlCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        cache.insert(1, 1).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert(2, 2).await;
        // Touch 1 so 2 becomes the LRU victim
        let _ = cache.get(&1).await;
        cache.insert(3, 3).await;
        assert!(cache.get(&1).await.is_some());
        assert!(cache.get(&2).await.is_none());
        assert!(cache.get(&3).await.is_some());
    }
}
