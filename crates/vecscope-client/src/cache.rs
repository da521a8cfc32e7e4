//! Result and Schema Caching Layer

use crate::discovery::DiscoveredAttribute;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vecscope_common::{Document, SortDirection, Value};

// Generic TTL cache

/// A cached payload and the moment it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: Arc<T>,
    pub timestamp: Instant,
    hit_count: u64,
}

impl<T> CacheEntry<T> {
    fn new(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
            timestamp: Instant::now(),
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() > ttl
    }
}

/// Key/value store whose entries expire after a fixed TTL.
///
/// Expired entries are dropped lazily on lookup. When full, the oldest entry
/// is evicted to make room.
pub struct TtlCache<K, V> {
    cache: RwLock<HashMap<K, CacheEntry<V>>>,
    max_entries: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Look up a live entry.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut cache = self.cache.write();

        if let Some(entry) = cache.get_mut(key) {
            // Check TTL
            if entry.is_expired(self.ttl) {
                cache.remove(key);
                return None;
            }
            entry.hit_count += 1;
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    /// Insert or replace an entry, stamping it with the current time.
    pub fn insert(&self, key: K, value: V) {
        let mut cache = self.cache.write();

        if !cache.contains_key(&key) && cache.len() >= self.max_entries {
            self.evict_one(&mut cache);
        }

        cache.insert(key, CacheEntry::new(value));
    }

    /// Drop every entry whose key matches `predicate`. Returns how many went.
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|key, _| !predicate(key));
        before - cache.len()
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            entries: cache.len(),
            max_entries: self.max_entries,
            hits: cache.values().map(|entry| entry.hit_count).sum(),
        }
    }

    fn evict_one(&self, cache: &mut HashMap<K, CacheEntry<V>>) {
        // Oldest entry goes first
        if let Some(oldest_key) = cache
            .iter()
            .min_by_key(|(_, entry)| entry.timestamp)
            .map(|(key, _)| key.clone())
        {
            cache.remove(&oldest_key);
        }
    }
}

// Keys

/// Identifies one page of one query shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub connection_id: String,
    pub namespace: String,
    pub search_text: String,
    /// JSON rendering of the active filters.
    pub filters: String,
    pub sort_attribute: String,
    pub sort_direction: SortDirection,
    pub page: usize,
    pub page_size: usize,
}

/// Identifies a discovered schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaCacheKey {
    pub connection_id: String,
    pub namespace: String,
    pub options: String,
}

/// What gets cached for a page.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    pub documents: Vec<Document>,
    pub total_count: u64,
    pub next_cursor: Option<Value>,
}

// Combined cache

/// Query-result and schema caches with shared invalidation.
pub struct EngineCache {
    pub queries: TtlCache<QueryCacheKey, CachedPage>,
    pub schemas: TtlCache<SchemaCacheKey, Vec<DiscoveredAttribute>>,
}

impl EngineCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            queries: TtlCache::new(max_entries, ttl),
            schemas: TtlCache::new(max_entries, ttl),
        }
    }

    /// Drop everything cached for a namespace.
    ///
    /// Call this after writes.
    pub fn invalidate_namespace(&self, connection_id: &str, namespace: &str) -> usize {
        let queries = self
            .queries
            .invalidate_where(|key| key.connection_id == connection_id && key.namespace == namespace);
        let schemas = self
            .schemas
            .invalidate_where(|key| key.connection_id == connection_id && key.namespace == namespace);
        queries + schemas
    }

    /// Clear all caches.
    pub fn clear_all(&self) {
        self.queries.clear();
        self.schemas.clear();
    }

    pub fn stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            queries: self.queries.stats(),
            schemas: self.schemas.stats(),
        }
    }
}

impl Default for EngineCache {
    fn default() -> Self {
        Self::new(500, Duration::from_secs(300)) // 5 minutes
    }
}

// Statistics

/// Statistics for a single cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
}

/// Statistics for both caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCacheStats {
    pub queries: CacheStats,
    pub schemas: CacheStats,
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn key(namespace: &str, page: usize) -> QueryCacheKey {
        QueryCacheKey {
            connection_id: "local".into(),
            namespace: namespace.into(),
            search_text: String::new(),
            filters: "[]".into(),
            sort_attribute: "id".into(),
            sort_direction: SortDirection::Asc,
            page,
            page_size: 50,
        }
    }

    fn page(ids: &[i64]) -> CachedPage {
        CachedPage {
            documents: ids.iter().copied().map(Document::new).collect(),
            total_count: ids.len() as u64,
            next_cursor: None,
        }
    }

    #[test]
    fn test_ttl_cache_basic() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.insert(key("a", 1), page(&[1, 2]));

        let cached = cache.get(&key("a", 1)).expect("Should find cached entry");
        assert_eq!(cached.total_count, 2);
        assert!(cache.get(&key("a", 2)).is_none());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_ttl_cache_expiry() {
        let cache = TtlCache::new(10, Duration::from_millis(10));
        cache.insert(key("a", 1), page(&[1]));
        assert!(cache.get(&key("a", 1)).is_some());

        // Wait for TTL to expire
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get(&key("a", 1)).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_ttl_cache_evicts_oldest() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(key("a", 1), page(&[1]));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key("a", 2), page(&[2]));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key("a", 3), page(&[3]));

        assert!(cache.get(&key("a", 1)).is_none());
        assert!(cache.get(&key("a", 2)).is_some());
        assert!(cache.get(&key("a", 3)).is_some());
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(key("a", 1), page(&[1]));
        cache.insert(key("a", 2), page(&[2]));
        cache.insert(key("a", 2), page(&[2, 3]));
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get(&key("a", 1)).is_some());
    }

    #[test]
    fn test_invalidate_namespace() {
        let cache = EngineCache::default();
        cache.queries.insert(key("a", 1), page(&[1]));
        cache.queries.insert(key("b", 1), page(&[1]));
        cache.schemas.insert(
            SchemaCacheKey {
                connection_id: "local".into(),
                namespace: "a".into(),
                options: "500".into(),
            },
            Vec::new(),
        );

        assert_eq!(cache.invalidate_namespace("local", "a"), 2);
        assert!(cache.queries.get(&key("a", 1)).is_none());
        assert!(cache.queries.get(&key("b", 1)).is_some());
        assert_eq!(cache.stats().schemas.entries, 0);
    }
}
