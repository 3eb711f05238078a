//! Sharded hash index.
//!
//! An unordered multi-map tuned for point operations under many writers.
//! The key space is partitioned into a fixed number of shards; a key hashes
//! to exactly one shard, and each shard owns an independent latch, so
//! writers on different shards never touch the same lock.
//!
//! Within a shard, each key maps to a shared-owned bucket holding the
//! key's value set behind its own reader/writer latch. Writers on distinct
//! keys of the same shard contend only on the short shard-lookup path; the
//! set mutation itself happens under the finer bucket latch. Because the
//! bucket is behind an `Arc`, a reader may keep its reference after the
//! shard latch is released, and a concurrent whole-key removal leaves that
//! reader's bucket alive.
//!
//! Latch order: shard before bucket, and no operation ever holds two
//! shards, so the locking is deadlock free.

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::Index;

/// Default shard count.
pub const DEFAULT_NUM_SHARDS: usize = 256;

/// Value set for a single key, guarded independently of the shard map.
struct Bucket<V> {
    values: RwLock<HashSet<V>>,
}

impl<V> Bucket<V> {
    fn new() -> Self {
        Self {
            values: RwLock::new(HashSet::new()),
        }
    }
}

type Shard<K, V> = RwLock<HashMap<K, Arc<Bucket<V>>>>;

/// Sharded hash index: an unordered concurrent multi-map.
pub struct InvertedIndex<K, V, S = RandomState> {
    shards: Vec<CachePadded<Shard<K, V>>>,
    state: S,
}

impl<K, V> InvertedIndex<K, V, RandomState>
where
    K: Hash + Eq,
{
    /// Creates an index with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_NUM_SHARDS)
    }

    /// Creates an index with `num_shards` shards (at least one).
    pub fn with_shards(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        let shards = (0..num_shards)
            .map(|_| CachePadded::new(RwLock::new(HashMap::new())))
            .collect();
        Self {
            shards,
            state: RandomState::new(),
        }
    }
}

impl<K, V> Default for InvertedIndex<K, V, RandomState>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> InvertedIndex<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let hash = self.state.hash_one(key) as usize;
        &self.shards[hash % self.shards.len()]
    }

    /// Returns the key's bucket, creating it if absent.
    ///
    /// Lookup is optimistic under the shard's read latch; only a miss pays
    /// for the write latch, and the entry is re-checked after the upgrade
    /// because another writer may have created it in the gap.
    fn get_or_create_bucket(&self, key: K) -> Arc<Bucket<V>> {
        let shard = self.shard_for(&key);

        {
            let map = shard.read();
            if let Some(bucket) = map.get(&key) {
                return Arc::clone(bucket);
            }
        }

        let mut map = shard.write();
        // double check
        if let Some(bucket) = map.get(&key) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(Bucket::new());
        map.insert(key, Arc::clone(&bucket));
        bucket
    }

    /// Removes a whole key and its value set.
    ///
    /// The bucket entry is erased without draining the set: a concurrent
    /// reader that already holds the bucket's shared reference keeps
    /// reading a live set.
    pub fn remove(&self, key: &K) -> bool {
        let shard = self.shard_for(key);
        let mut map = shard.write();
        map.remove(key).is_some()
    }
}

impl<K, V, S> InvertedIndex<K, V, S>
where
    K: Hash + Eq,
    V: Hash + Eq,
    S: BuildHasher,
{
    /// Removes a single `(key, value)` pair. A bucket whose last value is
    /// removed is erased from the shard.
    pub fn remove_value(&self, key: &K, value: &V) -> bool {
        let shard = self.shard_for(key);
        let mut map = shard.write();

        let Some(bucket) = map.get(key) else {
            return false;
        };
        let bucket = Arc::clone(bucket);

        let mut values = bucket.values.write();
        let removed = values.remove(value);
        let emptied = removed && values.is_empty();
        drop(values);

        if emptied {
            map.remove(key);
        }
        removed
    }
}

impl<K, V, S> Index<K, V> for InvertedIndex<K, V, S>
where
    K: Hash + Eq + Send + Sync,
    V: Hash + Eq + Clone + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> bool {
        let bucket = self.get_or_create_bucket(key);
        let mut values = bucket.values.write();
        values.insert(value)
    }

    fn search(&self, key: &K) -> HashSet<V> {
        let shard = self.shard_for(key);
        let map = shard.read();

        let Some(bucket) = map.get(key) else {
            return HashSet::new();
        };
        // Bucket read latch is taken while the shard latch is still held so
        // a concurrent whole-key removal cannot slip in between.
        let values = bucket.values.read();
        values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> InvertedIndex<String, String> {
        InvertedIndex::new()
    }

    #[test]
    fn test_insert_and_search() {
        let idx = index();
        assert!(idx.insert("a".to_string(), "1".to_string()));
        assert!(idx.insert("a".to_string(), "2".to_string()));
        // re-inserting an existing pair is a no-op
        assert!(!idx.insert("a".to_string(), "1".to_string()));

        let values = idx.search(&"a".to_string());
        assert_eq!(values.len(), 2);
        assert!(values.contains("1"));
        assert!(values.contains("2"));
    }

    #[test]
    fn test_search_missing_key_is_empty() {
        let idx = index();
        assert!(idx.search(&"missing".to_string()).is_empty());
    }

    #[test]
    fn test_remove_whole_key() {
        let idx = index();
        idx.insert("a".to_string(), "1".to_string());
        idx.insert("a".to_string(), "2".to_string());

        assert!(idx.remove(&"a".to_string()));
        assert!(idx.search(&"a".to_string()).is_empty());
        assert!(!idx.remove(&"a".to_string()));
    }

    #[test]
    fn test_remove_value() {
        let idx = index();
        idx.insert("a".to_string(), "1".to_string());
        idx.insert("a".to_string(), "2".to_string());

        assert!(idx.remove_value(&"a".to_string(), &"1".to_string()));
        let values = idx.search(&"a".to_string());
        assert_eq!(values.len(), 1);
        assert!(values.contains("2"));

        assert!(!idx.remove_value(&"a".to_string(), &"1".to_string()));
        assert!(!idx.remove_value(&"b".to_string(), &"1".to_string()));
    }

    #[test]
    fn test_remove_last_value_erases_key() {
        let idx = index();
        idx.insert("a".to_string(), "1".to_string());

        assert!(idx.remove_value(&"a".to_string(), &"1".to_string()));
        assert!(idx.search(&"a".to_string()).is_empty());
        // the bucket entry is gone, so the whole-key removal has nothing left
        assert!(!idx.remove(&"a".to_string()));
    }

    #[test]
    fn test_single_shard_still_correct() {
        let idx: InvertedIndex<String, String> = InvertedIndex::with_shards(1);
        for i in 0..100 {
            assert!(idx.insert(format!("k{}", i), "v".to_string()));
        }
        for i in 0..100 {
            assert!(idx.search(&format!("k{}", i)).contains("v"));
        }
    }

    #[test]
    fn test_reinsert_after_remove() {
        let idx = index();
        idx.insert("a".to_string(), "1".to_string());
        idx.remove(&"a".to_string());
        assert!(idx.insert("a".to_string(), "9".to_string()));

        let values = idx.search(&"a".to_string());
        assert_eq!(values.len(), 1);
        assert!(values.contains("9"));
    }
}
