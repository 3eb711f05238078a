//! Latch-coupled B+ tree index.
//!
//! An ordered multi-map supporting point operations and ascending range
//! scans. Keys live in sorted order; leaves carry the value sets and are
//! chained through a forward `next` pointer for range traversal:
//!
//! ```text
//!                [ 30 ]
//!               /      \
//!     [10, 20]           [30, 40, 50]
//!        └──────next──────────┘
//! ```
//!
//! Every node is guarded by its own reader/writer latch. Readers descend
//! with shared latches hand over hand (acquire the child, then release the
//! parent). Inserts are two-phase: an optimistic pass shared-couples down
//! and takes the leaf exclusively, succeeding whenever the leaf has room;
//! otherwise a pessimistic pass takes the tree-global latch, write-couples
//! the whole path, releases everything above the deepest insert-safe
//! ancestor, and splits bottom-up from the leaf to that ancestor.
//!
//! The root is replaced only during a root split, which always runs under
//! the tree-global latch. Readers re-check the root slot after latching
//! their entry node and restart if it moved.
//!
//! Latch order, everywhere: tree-global before any node, parent before
//! child, leaf before its `next` sibling. No operation acquires against
//! that order, so the tree cannot deadlock.
//!
//! Whole-key deletion with borrow/merge rebalancing is not implemented.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::Index;

/// Default tree order (max children of an internal node, max keys of a leaf).
pub const DEFAULT_ORDER: usize = 64;

type NodeRef<K, V> = Arc<RwLock<Node<K, V>>>;
type ReadGuard<K, V> = ArcRwLockReadGuard<RawRwLock, Node<K, V>>;
type WriteGuard<K, V> = ArcRwLockWriteGuard<RawRwLock, Node<K, V>>;

/// A tree node. Exactly one of `values` (leaf) or `children` (internal) is
/// populated; a node's kind never changes after construction.
///
/// Internal layout: `children[i]` spans `[keys[i-1], keys[i])`, so a node
/// with `n` children carries `n - 1` separator keys.
struct Node<K, V> {
    keys: Vec<K>,
    /// Parallel to `keys` on leaves.
    values: Vec<HashSet<V>>,
    children: Vec<NodeRef<K, V>>,
    /// Leaf chain in ascending key order.
    next: Option<NodeRef<K, V>>,
    is_leaf: bool,
}

impl<K, V> Node<K, V> {
    fn leaf() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            next: None,
            is_leaf: true,
        }
    }

    fn internal(keys: Vec<K>, children: Vec<NodeRef<K, V>>) -> Self {
        Self {
            keys,
            values: Vec::new(),
            children,
            next: None,
            is_leaf: false,
        }
    }
}

/// Concurrent B+ tree: an ordered multi-map with range scans.
pub struct BPlusTree<K, V> {
    /// Shared-reference slot for the root; replaced only on root split.
    root: RwLock<NodeRef<K, V>>,
    /// Serializes structural modifications against one another. Readers
    /// never take it.
    tree_latch: Mutex<()>,
    order: usize,
}

impl<K, V> BPlusTree<K, V> {
    /// Creates an empty tree with the default order.
    pub fn new() -> Self {
        Self::with_order(DEFAULT_ORDER)
    }

    /// Creates an empty tree of the given order (minimum 3).
    pub fn with_order(order: usize) -> Self {
        Self {
            root: RwLock::new(Arc::new(RwLock::new(Node::leaf()))),
            tree_latch: Mutex::new(()),
            order: order.max(3),
        }
    }

    /// Tree order.
    pub fn order(&self) -> usize {
        self.order
    }

    fn load_root(&self) -> NodeRef<K, V> {
        Arc::clone(&*self.root.read())
    }

    /// A node is insert-safe when one more key cannot overflow it, i.e. a
    /// split below stops at this node.
    fn is_safe_for_insert(&self, node: &Node<K, V>) -> bool {
        if node.is_leaf {
            node.keys.len() < self.order
        } else {
            node.keys.len() < self.order - 1
        }
    }

    /// Index of the first key strictly greater than `key` (child pick).
    fn upper_bound(keys: &[K], key: &K) -> usize
    where
        K: Ord,
    {
        keys.partition_point(|k| k <= key)
    }

    /// Index of the first key not less than `key` (leaf slot).
    fn lower_bound(keys: &[K], key: &K) -> usize
    where
        K: Ord,
    {
        keys.partition_point(|k| k < key)
    }
}

impl<K, V> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone,
    V: Hash + Eq + Clone,
{
    /// Inserts into a leaf already exclusively latched by the caller.
    /// Returns whether the pair was newly added.
    fn insert_into_leaf(leaf: &mut Node<K, V>, key: K, value: V) -> bool {
        debug_assert!(leaf.is_leaf);
        let idx = Self::lower_bound(&leaf.keys, &key);
        if idx < leaf.keys.len() && leaf.keys[idx] == key {
            leaf.values[idx].insert(value)
        } else {
            let mut set = HashSet::new();
            set.insert(value);
            leaf.keys.insert(idx, key);
            leaf.values.insert(idx, set);
            true
        }
    }

    /// Splits an over-full leaf. The right half moves to a new sibling and
    /// the sibling's first key is promoted (and thereby duplicated: it
    /// stays in the sibling leaf and becomes the parent separator).
    fn split_leaf(leaf: &mut Node<K, V>) -> (K, NodeRef<K, V>) {
        let mid = leaf.keys.len() / 2;
        let sib_keys = leaf.keys.split_off(mid);
        let sib_values = leaf.values.split_off(mid);
        let sep = sib_keys[0].clone();

        let mut sibling = Node::leaf();
        sibling.keys = sib_keys;
        sibling.values = sib_values;
        // splice the leaf chain: leaf -> sibling -> old successor
        sibling.next = leaf.next.take();
        let sibling = Arc::new(RwLock::new(sibling));
        leaf.next = Some(Arc::clone(&sibling));
        (sep, sibling)
    }

    /// Splits an over-full internal node. The middle key is removed and
    /// promoted (not duplicated).
    fn split_internal(node: &mut Node<K, V>) -> (K, NodeRef<K, V>) {
        let mid = node.keys.len() / 2;
        let mut sib_keys = node.keys.split_off(mid);
        let sep = sib_keys.remove(0);
        let sib_children = node.children.split_off(mid + 1);
        let sibling = Arc::new(RwLock::new(Node::internal(sib_keys, sib_children)));
        (sep, sibling)
    }

    /// Shared-couples from the root to the target leaf and returns the
    /// leaf exclusively latched. Restarts if the root slot moves between
    /// loading it and latching the entry node.
    fn latch_leaf_exclusive(&self, key: &K) -> WriteGuard<K, V> {
        loop {
            let initial_root = self.load_root();

            // single-leaf tree: the root itself is the target
            let root_read: ReadGuard<K, V> = initial_root.read_arc();
            if !Arc::ptr_eq(&self.load_root(), &initial_root) {
                continue; // root changed
            }
            if root_read.is_leaf {
                drop(root_read);
                let write = initial_root.write_arc();
                // revalidate: a root split may have run while we waited
                if !Arc::ptr_eq(&self.load_root(), &initial_root) {
                    continue;
                }
                return write;
            }

            let mut guard = root_read;
            loop {
                let idx = Self::upper_bound(&guard.keys, key);
                let child = Arc::clone(&guard.children[idx]);
                // node kind is immutable, a momentary latch suffices
                let child_is_leaf = child.read().is_leaf;
                if child_is_leaf {
                    // parent stays latched until the leaf latch is held
                    let write = child.write_arc();
                    return write;
                }
                let next = child.read_arc();
                guard = next;
            }
        }
    }

    /// Optimistic insert: exclusive leaf latch only. `None` means the leaf
    /// was full and the caller must fall back to the pessimistic path.
    fn optimistic_insert(&self, key: &K, value: &V) -> Option<bool> {
        let mut leaf = self.latch_leaf_exclusive(key);
        if !self.is_safe_for_insert(&leaf) {
            return None;
        }
        Some(Self::insert_into_leaf(&mut leaf, key.clone(), value.clone()))
    }

    /// Pessimistic insert: write-couples the full path under the tree
    /// latch, keeps latches from the deepest insert-safe ancestor down,
    /// then splits bottom-up. Only this path ever replaces the root.
    fn pessimistic_insert(&self, key: K, value: V) -> bool {
        let mut tree_guard = Some(self.tree_latch.lock());

        // stable while the tree latch is held: only root splits (which
        // run under this latch) replace the slot
        let root = self.load_root();
        let mut held: Vec<WriteGuard<K, V>> = Vec::new();
        let mut refs: Vec<NodeRef<K, V>> = Vec::new();

        let root_guard = root.write_arc();
        if self.is_safe_for_insert(&root_guard) {
            tree_guard = None;
        }
        held.push(root_guard);
        refs.push(root);

        loop {
            let child = {
                let top = held.last().expect("path never empties");
                if top.is_leaf {
                    break;
                }
                let idx = Self::upper_bound(&top.keys, &key);
                Arc::clone(&top.children[idx])
            };
            let child_guard = child.write_arc();
            if self.is_safe_for_insert(&child_guard) {
                // a split below stops at this child: ancestors can go
                held.clear();
                refs.clear();
                tree_guard = None;
            }
            held.push(child_guard);
            refs.push(child);
        }

        let added;
        let mut carry: Option<(K, NodeRef<K, V>)> = None;
        {
            let leaf = held.last_mut().expect("path never empties");
            added = Self::insert_into_leaf(leaf, key, value);
            if leaf.keys.len() > self.order {
                carry = Some(Self::split_leaf(leaf));
            }
        }

        let mut level = held.len() - 1;
        while let Some((sep, sibling)) = carry.take() {
            if level == 0 {
                // the whole held path split, so held[0] is an unsafe root
                // and the tree latch is still ours: grow the tree
                debug_assert!(tree_guard.is_some());
                let old_root = Arc::clone(&refs[0]);
                let new_root =
                    Arc::new(RwLock::new(Node::internal(vec![sep], vec![old_root, sibling])));
                *self.root.write() = new_root;
                break;
            }
            level -= 1;
            let parent = &mut held[level];
            let idx = Self::upper_bound(&parent.keys, &sep);
            parent.keys.insert(idx, sep);
            parent.children.insert(idx + 1, sibling);
            if parent.keys.len() > self.order - 1 {
                carry = Some(Self::split_internal(parent));
            }
        }

        drop(held);
        drop(tree_guard);
        added
    }

    /// Collects `(key, value-set)` pairs over the half-open range
    /// `[lo, hi)` in ascending key order.
    ///
    /// Each visited leaf contributes a consistent snapshot; the scan hands
    /// over along the leaf chain, so keys inserted behind it into already
    /// visited leaves are not revisited.
    pub fn range_search(&self, lo: &K, hi: &K) -> BTreeMap<K, HashSet<V>> {
        let mut result = BTreeMap::new();
        if lo >= hi {
            return result;
        }

        loop {
            let initial_root = self.load_root();
            let mut guard: ReadGuard<K, V> = initial_root.read_arc();
            if !Arc::ptr_eq(&self.load_root(), &initial_root) {
                continue; // root changed
            }

            while !guard.is_leaf {
                let idx = Self::upper_bound(&guard.keys, lo);
                let child = Arc::clone(&guard.children[idx]);
                let child_guard = child.read_arc();
                guard = child_guard;
            }

            loop {
                let start = Self::lower_bound(&guard.keys, lo);
                let mut done = false;
                for idx in start..guard.keys.len() {
                    if guard.keys[idx] >= *hi {
                        done = true;
                        break;
                    }
                    result.insert(guard.keys[idx].clone(), guard.values[idx].clone());
                }
                if done {
                    break;
                }
                let next = guard.next.as_ref().map(Arc::clone);
                match next {
                    Some(next) => {
                        // hand over hand along the leaf chain
                        let next_guard = next.read_arc();
                        guard = next_guard;
                    }
                    None => break,
                }
            }
            return result;
        }
    }
}

impl<K, V> Index<K, V> for BPlusTree<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Hash + Eq + Clone + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> bool {
        match self.optimistic_insert(&key, &value) {
            Some(added) => added,
            None => self.pessimistic_insert(key, value),
        }
    }

    fn search(&self, key: &K) -> HashSet<V> {
        loop {
            let initial_root = self.load_root();
            let mut guard: ReadGuard<K, V> = initial_root.read_arc();
            if !Arc::ptr_eq(&self.load_root(), &initial_root) {
                continue; // root changed
            }

            while !guard.is_leaf {
                let idx = Self::upper_bound(&guard.keys, key);
                let child = Arc::clone(&guard.children[idx]);
                let child_guard = child.read_arc();
                guard = child_guard;
            }

            let idx = Self::lower_bound(&guard.keys, key);
            if idx < guard.keys.len() && guard.keys[idx] == *key {
                return guard.values[idx].clone();
            }
            return HashSet::new();
        }
    }
}
