//! Concurrent in-memory index structures for lattice.
//!
//! This crate provides:
//! - The [`Index`] contract every index implements
//! - A sharded hash index for unordered, high-throughput point operations
//! - A lock-free skip list with non-blocking writes and logical deletion
//! - A latch-coupled B+ tree with ordered range scans
//!
//! All three map a key to a set of distinct values: re-inserting a present
//! `(key, value)` pair is a no-op, and lookups return a snapshot of the
//! value set that stays valid after the call returns.

mod btree;
mod inverted;
mod skiplist;

pub use btree::{BPlusTree, DEFAULT_ORDER};
pub use inverted::{InvertedIndex, DEFAULT_NUM_SHARDS};
pub use skiplist::{SkipList, MAX_LEVEL};

use std::collections::HashSet;

/// Point-operation contract shared by every index implementation.
///
/// Operations are safe under arbitrary concurrency. `search` returns a
/// copied snapshot of the key's value set; the caller may inspect it
/// without holding any index state.
pub trait Index<K, V>: Send + Sync {
    /// Adds the `(key, value)` pair. Returns whether the pair was newly
    /// added; inserting a pair that is already present is a no-op.
    fn insert(&self, key: K, value: V) -> bool;

    /// Returns a snapshot of the values stored under `key`. Absent keys
    /// yield an empty set.
    fn search(&self, key: &K) -> HashSet<V>;
}
