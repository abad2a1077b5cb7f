//! Concurrency guards: the named operation mutexes and self-cleaning TTL
//! caches.
//!
//! Lock acquisition follows a total order - submission before
//! queue-operation when both are needed in one flow - so the two mutexes
//! can never deadlock against each other.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Named, non-reentrant mutexes serializing the two critical flows.
///
/// - `submission` serializes the entire clip-submission pipeline to prevent
///   duplicate inserts.
/// - `queue_ops` serializes advance, previous, play, history jumps and batch
///   queue writes.
#[derive(Default)]
pub struct OperationGuards {
    pub submission: Mutex<()>,
    pub queue_ops: Mutex<()>,
}

impl OperationGuards {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Time-to-live cache over a lock-free map.
///
/// Entries expire `ttl` after insertion; reads of expired entries evict them
/// on the spot, and [`TtlCache::cleanup`] sweeps the rest periodically.
/// There are no cross-key invariants - every update touches a single key
/// atomically.
pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached value if it has not expired. Expired entries are
    /// removed on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let hit = self.entries.get(key).map(|r| r.value().clone());
        match hit {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or refreshes a key, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    /// Whether a live (non-expired) entry exists for the key.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, (_, v))| v)
    }

    /// Count of entries, expired sweepings pending included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry. Called by the periodic sweeper task.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (inserted, _)| inserted.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_live_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        assert!(cache.contains(&"k"));
    }

    #[test]
    fn expired_entries_evict_on_read() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn insert_refreshes_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cleanup_sweeps_expired_entries() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.cleanup();
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.clear();
        assert!(cache.get(&"a").is_none());
    }

    #[tokio::test]
    async fn guards_serialize_critical_sections() {
        use std::sync::Arc;

        let guards = Arc::new(OperationGuards::new());
        let first = guards.submission.lock().await;
        assert!(guards.submission.try_lock().is_err());
        drop(first);
        assert!(guards.submission.try_lock().is_ok());
    }
}
