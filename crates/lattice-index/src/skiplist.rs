//! Lock-free skip list.
//!
//! An ordered multi-map whose writers never block: every structural update
//! is a single CAS, and a failed CAS always means another thread made
//! progress. Node layout:
//!
//! ```text
//! level 3: head ----------------> c ------------------> null
//! level 2: head ------> a ------> c ------------------> null
//! level 1: head ------> a ------> c ------> e --------> null
//! level 0: head -> a -> b -> c -> d -> e -------------> null
//! ```
//!
//! Deletion is logical first, physical later: the low bit of a node's
//! outgoing `next` pointer marks the node as deleted at that level, and a
//! node whose level-0 edge is marked is invisible to every subsequent
//! operation. Traversals unlink marked nodes as they pass (helping), so
//! physical removal is cooperative and no operation ever waits for it.
//!
//! All observable ordering flows through level 0. Higher levels are
//! navigation hints only; a node left "short" by a failed upper-level link
//! is still found through its level-0 edge.
//!
//! Reclamation: a node unlinked from level 0 stays readable for in-flight
//! traversals, so its storage cannot be freed inline. The unlinking thread
//! pushes it onto a retired stack (CAS push, no lock), and everything is
//! freed in `Drop`, which holds `&mut self` and therefore runs after every
//! reader is gone.

use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::Index;

/// Maximum node height; level draws are capped here.
pub const MAX_LEVEL: usize = 16;

// ----- pointer marking utilities -----

#[inline(always)]
fn is_marked<T>(ptr: *mut T) -> bool {
    ptr as usize & 1 == 1
}

#[inline(always)]
fn marked<T>(ptr: *mut T) -> *mut T {
    (ptr as usize | 1) as *mut T
}

#[inline(always)]
fn unmarked<T>(ptr: *mut T) -> *mut T {
    (ptr as usize & !1) as *mut T
}

struct Node<K, V> {
    /// `None` only for the head sentinel.
    key: Option<K>,
    /// Value set, mutated only under this latch.
    values: RwLock<HashSet<V>>,
    /// Height of this node; `next` has exactly this many slots.
    level: usize,
    /// Forward pointers, low bit = deletion mark on the outgoing edge.
    next: Box<[AtomicPtr<Node<K, V>>]>,
    /// Link for the retired stack; untouched while the node is live.
    retired_next: AtomicPtr<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    fn alloc(key: Option<K>, values: HashSet<V>, level: usize) -> *mut Self {
        let next = (0..level)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::into_raw(Box::new(Node {
            key,
            values: RwLock::new(values),
            level,
            next,
            retired_next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Lock-free skip list: an ordered concurrent multi-map.
pub struct SkipList<K, V> {
    head: *mut Node<K, V>,
    /// Stack of nodes unlinked from level 0, freed in `Drop`.
    retired: AtomicPtr<Node<K, V>>,
    _marker: PhantomData<Box<Node<K, V>>>,
}

// SAFETY: nodes are shared across threads behind atomic pointers and freed
// only in Drop (&mut self), so the list is as thread-safe as its contents.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for SkipList<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for SkipList<K, V> {}

impl<K, V> SkipList<K, V> {
    /// Creates an empty skip list.
    pub fn new() -> Self {
        Self {
            head: Node::alloc(None, HashSet::new(), MAX_LEVEL),
            retired: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Geometric level draw: p = 1/2 per extra level, capped at MAX_LEVEL.
    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Pushes a level-0-unlinked node onto the retired stack.
    fn retire(&self, node: *mut Node<K, V>) {
        debug_assert!(!is_marked(node));
        loop {
            let head = self.retired.load(Ordering::Relaxed);
            // SAFETY: `node` was just unlinked by the caller and is not
            // freed until Drop; only the unlinking thread touches
            // `retired_next`.
            unsafe { (*node).retired_next.store(head, Ordering::Relaxed) };
            if self
                .retired
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

impl<K, V> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SkipList<K, V>
where
    K: Ord,
{
    /// Locates the key's position at every level.
    ///
    /// Sweeps each level top to bottom, physically unlinking any marked
    /// successor it passes. A failed unlink CAS means a neighbor changed
    /// under us, so the whole traversal restarts from the head. On return,
    /// `preds[l]` is the last node strictly before `key` at level `l` and
    /// `succs[l]` the first candidate at or after it (null = end of level).
    /// The result reports whether `succs[0]` carries the key.
    fn find(
        &self,
        key: &K,
        preds: &mut [*mut Node<K, V>; MAX_LEVEL],
        succs: &mut [*mut Node<K, V>; MAX_LEVEL],
    ) -> bool {
        'restart: loop {
            let mut pred = self.head;
            for level in (0..MAX_LEVEL).rev() {
                // SAFETY: pred is the head or a node reached through live
                // edges; nodes are never freed while the list is shared.
                let mut curr =
                    unmarked(unsafe { &*pred }.next[level].load(Ordering::Acquire));
                loop {
                    let mut succ = if curr.is_null() {
                        ptr::null_mut()
                    } else {
                        unsafe { &*curr }.next[level].load(Ordering::Acquire)
                    };

                    // curr's outgoing edge is marked: curr is deleted at
                    // this level, swing pred past it.
                    while is_marked(succ) {
                        let unmarked_succ = unmarked(succ);
                        if unsafe { &*pred }.next[level]
                            .compare_exchange(
                                curr,
                                unmarked_succ,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_err()
                        {
                            continue 'restart;
                        }
                        if level == 0 {
                            // level-0 unlink happens exactly once per node
                            self.retire(curr);
                        }
                        curr = unmarked(
                            unsafe { &*pred }.next[level].load(Ordering::Acquire),
                        );
                        succ = if curr.is_null() {
                            ptr::null_mut()
                        } else {
                            unsafe { &*curr }.next[level].load(Ordering::Acquire)
                        };
                    }

                    let advance = !curr.is_null()
                        && match unsafe { &*curr }.key.as_ref() {
                            Some(k) => k < key,
                            None => false,
                        };
                    if advance {
                        pred = curr;
                        curr = unmarked(succ);
                    } else {
                        break;
                    }
                }
                preds[level] = pred;
                succs[level] = curr;
            }

            let found = !succs[0].is_null()
                && unsafe { &*succs[0] }.key.as_ref() == Some(key);
            return found;
        }
    }

    /// Logically deletes the key by marking every outgoing edge, top level
    /// first. Returns true only for the call whose CAS set the level-0
    /// mark; concurrent removers of the same key resolve to one winner.
    /// Physical unlinking is left to later traversals.
    pub fn remove(&self, key: &K) -> bool {
        let mut preds = [ptr::null_mut(); MAX_LEVEL];
        let mut succs = [ptr::null_mut(); MAX_LEVEL];
        if !self.find(key, &mut preds, &mut succs) {
            return false;
        }

        let node = succs[0];
        // SAFETY: node came out of find and cannot be freed before Drop.
        let node_ref = unsafe { &*node };
        let mut won_level0 = false;
        for level in (0..node_ref.level).rev() {
            let mut succ = node_ref.next[level].load(Ordering::Acquire);
            while !is_marked(succ) {
                match node_ref.next[level].compare_exchange(
                    succ,
                    marked(succ),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        if level == 0 {
                            won_level0 = true;
                        }
                        break;
                    }
                    Err(actual) => succ = actual,
                }
            }
        }
        won_level0
    }
}

impl<K, V> Index<K, V> for SkipList<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Hash + Eq + Clone + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> bool {
        let mut preds = [ptr::null_mut(); MAX_LEVEL];
        let mut succs = [ptr::null_mut(); MAX_LEVEL];
        loop {
            if self.find(&key, &mut preds, &mut succs) {
                let node = succs[0];
                // SAFETY: see find; nodes outlive every traversal.
                let node_ref = unsafe { &*node };
                if is_marked(node_ref.next[0].load(Ordering::Acquire)) {
                    // doomed node, let a traversal unlink it and retry
                    continue;
                }
                let mut values = node_ref.values.write();
                return values.insert(value);
            }

            let level = Self::random_level();
            let mut set = HashSet::new();
            set.insert(value.clone());
            let new_node = Node::alloc(Some(key.clone()), set, level);

            // publish through level 0; higher levels are best effort
            unsafe { (*new_node).next[0].store(succs[0], Ordering::Relaxed) };
            if unsafe { &*preds[0] }.next[0]
                .compare_exchange(succs[0], new_node, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // SAFETY: the level-0 CAS failed, so no other thread has
                // seen this node and it can be freed inline.
                drop(unsafe { Box::from_raw(new_node) });
                continue;
            }

            for l in 1..level {
                unsafe { (*new_node).next[l].store(succs[l], Ordering::Release) };
                if unsafe { &*preds[l] }.next[l]
                    .compare_exchange(succs[l], new_node, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // leave the node short; level 0 already makes it visible
                    break;
                }
            }
            return true;
        }
    }

    fn search(&self, key: &K) -> HashSet<V> {
        let mut preds = [ptr::null_mut(); MAX_LEVEL];
        let mut succs = [ptr::null_mut(); MAX_LEVEL];
        if self.find(key, &mut preds, &mut succs) {
            let node = succs[0];
            // SAFETY: see find.
            let node_ref = unsafe { &*node };
            if !is_marked(node_ref.next[0].load(Ordering::Acquire)) {
                return node_ref.values.read().clone();
            }
        }
        HashSet::new()
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        unsafe {
            // &mut self: no traversal is in flight, plain walks suffice
            let mut curr = unmarked((*self.head).next[0].load(Ordering::Relaxed));
            while !curr.is_null() {
                let next = unmarked((*curr).next[0].load(Ordering::Relaxed));
                drop(Box::from_raw(curr));
                curr = next;
            }
            let mut curr = self.retired.load(Ordering::Relaxed);
            while !curr.is_null() {
                let next = (*curr).retired_next.load(Ordering::Relaxed);
                drop(Box::from_raw(curr));
                curr = next;
            }
            drop(Box::from_raw(self.head));
        }
    }
}

impl<K, V> fmt::Debug for SkipList<K, V>
where
    K: fmt::Debug,
{
    /// Renders every level's chain; `(m)` flags logically deleted nodes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in (0..MAX_LEVEL).rev() {
            write!(f, "level {:2}: head", level)?;
            // SAFETY: read-only walk over live edges.
            let mut curr =
                unmarked(unsafe { &*self.head }.next[level].load(Ordering::Acquire));
            while !curr.is_null() {
                let node = unsafe { &*curr };
                write!(f, " -> {:?}", node.key.as_ref().unwrap())?;
                if is_marked(node.next[0].load(Ordering::Acquire)) {
                    write!(f, "(m)")?;
                }
                curr = unmarked(node.next[level].load(Ordering::Acquire));
            }
            writeln!(f, " -> ()")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<K: Ord + Clone, V> SkipList<K, V> {
        /// Keys along one level's chain, skipping logically deleted nodes.
        fn keys_at_level(&self, level: usize) -> Vec<K> {
            let mut keys = Vec::new();
            let mut curr =
                unmarked(unsafe { &*self.head }.next[level].load(Ordering::Acquire));
            while !curr.is_null() {
                let node = unsafe { &*curr };
                if !is_marked(node.next[0].load(Ordering::Acquire)) {
                    keys.push(node.key.clone().unwrap());
                }
                curr = unmarked(node.next[level].load(Ordering::Acquire));
            }
            keys
        }
    }

    fn list() -> SkipList<String, String> {
        SkipList::new()
    }

    #[test]
    fn test_insert_orders_level_zero() {
        let sl = list();
        for key in ["c", "a", "b", "e", "d"] {
            assert!(sl.insert(key.to_string(), "x".to_string()));
        }

        assert_eq!(sl.keys_at_level(0), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            sl.search(&"c".to_string()),
            HashSet::from(["x".to_string()])
        );
        assert!(sl.search(&"z".to_string()).is_empty());
    }

    #[test]
    fn test_every_level_stays_sorted() {
        let sl: SkipList<u32, u32> = SkipList::new();
        for key in 0..512 {
            sl.insert(key * 7919 % 512, key);
        }
        for level in 0..MAX_LEVEL {
            let keys = sl.keys_at_level(level);
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(keys, sorted, "level {} out of order", level);
        }
    }

    #[test]
    fn test_insert_is_idempotent_on_pairs() {
        let sl = list();
        assert!(sl.insert("k".to_string(), "1".to_string()));
        assert!(sl.insert("k".to_string(), "2".to_string()));
        assert!(!sl.insert("k".to_string(), "1".to_string()));

        let values = sl.search(&"k".to_string());
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_remove_hides_key() {
        let sl = list();
        for key in ["a", "b", "c"] {
            sl.insert(key.to_string(), "x".to_string());
        }

        assert!(sl.remove(&"b".to_string()));
        assert!(sl.search(&"b".to_string()).is_empty());
        assert_eq!(sl.keys_at_level(0), vec!["a", "c"]);

        // removing again finds nothing (or loses the marking race)
        assert!(!sl.remove(&"b".to_string()));
        assert!(!sl.remove(&"zzz".to_string()));
    }

    #[test]
    fn test_reinsert_after_remove_starts_fresh() {
        let sl = list();
        sl.insert("b".to_string(), "x".to_string());
        assert!(sl.remove(&"b".to_string()));
        assert!(sl.insert("b".to_string(), "y".to_string()));

        assert_eq!(
            sl.search(&"b".to_string()),
            HashSet::from(["y".to_string()])
        );
    }

    #[test]
    fn test_search_missing_is_empty() {
        let sl = list();
        assert!(sl.search(&"nope".to_string()).is_empty());
    }

    #[test]
    fn test_debug_render_marks_deleted() {
        let sl = list();
        sl.insert("a".to_string(), "x".to_string());
        sl.insert("b".to_string(), "x".to_string());
        sl.remove(&"a".to_string());

        let rendered = format!("{:?}", sl);
        assert!(rendered.contains("\"a\"(m)"));
        assert!(rendered.contains("\"b\""));
    }

    #[test]
    fn test_many_keys_roundtrip() {
        let sl: SkipList<u64, u64> = SkipList::new();
        for key in 0..2048u64 {
            assert!(sl.insert(key, key * 2));
        }
        for key in 0..2048u64 {
            assert_eq!(sl.search(&key), HashSet::from([key * 2]));
        }
        assert_eq!(sl.keys_at_level(0).len(), 2048);
    }
}
