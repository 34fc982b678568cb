// Short-TTL in-process cache for the public headhunt aggregates.
//
// Best effort and local to this process. Writes clear the whole cache and bump
// its generation, so values computed before the write are never stored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics;

/// Upper bound on live entries per cache.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

#[derive(Debug)]
struct Entries<V> {
    generation: u64,
    map: HashMap<String, (Instant, V)>,
}

#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    max_entries: usize,
    inner: Arc<Mutex<Entries<V>>>,
}

impl<V: Clone> TtlCache<V> {
    /// A zero `ttl` disables caching.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            inner: Arc::new(Mutex::new(Entries {
                generation: 0,
                map: HashMap::new(),
            })),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Take this before loading a value; `insert` drops the value if a
    /// `clear` happened in between.
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).generation
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let hit = match entries.map.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        };
        let outcome = if hit.is_some() { "hit" } else { "miss" };
        metrics::CACHE_LOOKUPS_TOTAL
            .with_label_values(&[self.name, outcome])
            .inc();
        hit
    }

    /// Store `value` unless the cache was cleared since `generation` was
    /// taken. Returns whether the value was stored.
    pub fn insert(&self, key: String, value: V, generation: u64) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if entries.generation != generation {
            tracing::debug!(cache = self.name, key, "Skipping value computed before a write");
            return false;
        }

        let now = Instant::now();
        let ttl = self.ttl;
        entries
            .map
            .retain(|_, (stored_at, _)| now.duration_since(*stored_at) < ttl);

        if !entries.map.contains_key(&key) && entries.map.len() >= self.max_entries {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.map.remove(&oldest);
            }
        }
        entries.map.insert(key, (now, value));
        true
    }

    pub fn clear(&self) {
        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        entries.generation = entries.generation.wrapping_add(1);
        if !entries.map.is_empty() {
            tracing::debug!(cache = self.name, entries = entries.map.len(), "Cache invalidated");
        }
        entries.map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl: Duration) -> TtlCache<i32> {
        TtlCache::new("test", ttl)
    }

    #[test]
    fn test_get_after_insert() {
        let cache = cache(Duration::from_secs(60));
        assert_eq!(cache.get("a"), None);
        assert!(cache.insert("a".into(), 1, cache.generation()));
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = cache(Duration::from_millis(10));
        cache.insert("a".into(), 1, cache.generation());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache = cache(Duration::from_millis(10));
        for key in ["a", "b", "c"] {
            cache.insert(key.into(), 1, cache.generation());
        }
        std::thread::sleep(Duration::from_millis(20));
        cache.insert("d".into(), 2, cache.generation());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = cache(Duration::ZERO);
        assert!(!cache.insert("a".into(), 1, cache.generation()));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = cache(Duration::from_secs(60));
        cache.insert("a".into(), 1, cache.generation());
        cache.insert("b".into(), 2, cache.generation());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_value_loaded_before_clear_is_not_stored() {
        let cache = cache(Duration::from_secs(60));
        let generation = cache.generation();
        assert_eq!(cache.get("all"), None);

        // A write lands while the reader is still computing
        cache.clear();

        assert!(!cache.insert("all".into(), 0, generation));
        assert_eq!(cache.get("all"), None);

        assert!(cache.insert("all".into(), 1, cache.generation()));
        assert_eq!(cache.get("all"), Some(1));
    }

    #[test]
    fn test_entry_count_is_bounded() {
        let cache = cache(Duration::from_secs(60)).with_max_entries(3);
        for i in 0..10 {
            cache.insert(format!("k{i}"), i, cache.generation());
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 3);
        // Oldest entries are evicted first
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k9"), Some(9));

        // Replacing an existing key does not evict anything
        cache.insert("k9".into(), 90, cache.generation());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("k8"), Some(8));
    }
}
