//! Snapshot storage behind the query cache.

use events_shared::{QueryKey, MAX_CACHED_QUERIES};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<V> {
    pub data: V,
    pub updated_at: Instant,
    pub invalidated: bool,
}

impl<V> QuerySnapshot<V> {
    /// Fresh means neither invalidated nor older than `stale_time`.
    /// A zero window is never fresh.
    pub fn is_fresh(&self, stale_time: Duration, now: Instant) -> bool {
        !self.invalidated && now.saturating_duration_since(self.updated_at) < stale_time
    }
}

/// Keyed snapshot cache shared by every view.
pub trait QueryStore<V>: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<QuerySnapshot<V>>;

    fn set(&self, key: QueryKey, data: V);

    fn remove(&self, key: &QueryKey) -> Option<QuerySnapshot<V>>;

    /// Marks every entry under `prefix` stale and returns the affected keys.
    fn invalidate(&self, prefix: &QueryKey) -> Vec<QueryKey>;
}

pub struct MemoryQueryStore<V> {
    entries: Mutex<LruCache<QueryKey, QuerySnapshot<V>>>,
}

impl<V: Clone + Send> MemoryQueryStore<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send> Default for MemoryQueryStore<V> {
    fn default() -> Self {
        Self::new(MAX_CACHED_QUERIES)
    }
}

impl<V: Clone + Send> QueryStore<V> for MemoryQueryStore<V> {
    fn get(&self, key: &QueryKey) -> Option<QuerySnapshot<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: QueryKey, data: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.put(
            key,
            QuerySnapshot {
                data,
                updated_at: Instant::now(),
                invalidated: false,
            },
        );
    }

    fn remove(&self, key: &QueryKey) -> Option<QuerySnapshot<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.pop(key)
    }

    fn invalidate(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut affected = Vec::new();
        for (key, snapshot) in entries.iter_mut() {
            if key.starts_with(prefix) {
                snapshot.invalidated = true;
                affected.push(key.clone());
            }
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events_shared::EventId;

    fn key(id: &str) -> QueryKey {
        QueryKey::event(&EventId::new(id))
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_freshness_window() {
        let store = MemoryQueryStore::default();
        store.set(key("1"), "v1".to_string());

        let snapshot = store.get(&key("1")).unwrap();
        assert!(snapshot.is_fresh(Duration::from_secs(10), Instant::now()));
        assert!(!snapshot.is_fresh(Duration::ZERO, Instant::now()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!snapshot.is_fresh(Duration::from_secs(10), Instant::now()));
    }

    #[test]
    fn test_invalidate_marks_prefix_only() {
        let store = MemoryQueryStore::default();
        store.set(key("1"), 1);
        store.set(key("2"), 2);
        store.set(QueryKey::new(["users", "1"]), 3);

        let mut affected = store.invalidate(&QueryKey::events());
        affected.sort();
        assert_eq!(affected, vec![key("1"), key("2")]);

        assert!(store.get(&key("1")).unwrap().invalidated);
        assert!(!store.get(&QueryKey::new(["users", "1"])).unwrap().invalidated);
    }

    #[test]
    fn test_set_after_invalidate_is_fresh_again() {
        let store = MemoryQueryStore::default();
        store.set(key("1"), 1);
        store.invalidate(&key("1"));
        store.set(key("1"), 2);

        let snapshot = store.get(&key("1")).unwrap();
        assert_eq!(snapshot.data, 2);
        assert!(!snapshot.invalidated);
    }

    #[test]
    fn test_lru_eviction() {
        let store = MemoryQueryStore::new(2);
        store.set(key("1"), 1);
        store.set(key("2"), 2);
        let _ = store.get(&key("1"));
        store.set(key("3"), 3);

        assert_eq!(store.len(), 2);
        assert!(store.get(&key("2")).is_none());
        assert!(store.get(&key("1")).is_some());
    }
}
