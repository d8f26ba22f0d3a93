use std::collections::hash_map::Entry;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use crate::node::Node;

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
struct Shard<K, V> {
    map: RwLock<AHashMap<K, Arc<Node<K, V>>>>,
}

/// A thread-safe node store backed by `N` independently-locked shards.
///
/// Reads use a shared lock, writes use an exclusive lock, both per-shard.
/// The store holds entries as `Arc<Node>` so the policy queues, read
/// buffers, and write queue can reference the same record, and so removal
/// can be *identity*-based: maintenance deletes the exact node it evicted,
/// never a newer entry that happens to share the key.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedStore<K, V> {
    pub(crate) fn new(num_shards: usize, initial_capacity: Option<usize>) -> Self {
        assert!(num_shards.is_power_of_two());
        let per_shard = initial_capacity
            .map(|total| total.div_ceil(num_shards))
            .unwrap_or(0);
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::with_capacity(per_shard)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard_index(&self, key: &K) -> usize {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        ((h >> 32) as usize) & self.shard_mask
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Returns the node for `key`, or `None` if absent.
    ///
    /// The caller is responsible for the liveness and expiration checks.
    pub(crate) fn get(&self, key: &K) -> Option<Arc<Node<K, V>>> {
        let idx = self.shard_index(key);
        self.shards[idx].map.read().get(key).map(Arc::clone)
    }

    /// Inserts `node`, displacing any previous entry for the same key.
    ///
    /// Returns the displaced node, if any.
    pub(crate) fn set(&self, node: Arc<Node<K, V>>) -> Option<Arc<Node<K, V>>> {
        let idx = self.shard_index(node.key());
        self.shards[idx]
            .map
            .write()
            .insert(node.key().clone(), node)
    }

    /// Inserts `node` unless a live, unexpired entry for the key exists.
    ///
    /// On success returns `Ok` with the displaced dead-or-expired node (if
    /// one was replaced); on failure returns `Err` with the incumbent.
    pub(crate) fn set_if_absent(
        &self,
        node: Arc<Node<K, V>>,
        now: u32,
    ) -> Result<Option<Arc<Node<K, V>>>, Arc<Node<K, V>>> {
        let idx = self.shard_index(node.key());
        let mut map = self.shards[idx].map.write();
        match map.entry(node.key().clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.is_alive() && !current.is_expired(now) {
                    Err(Arc::clone(current))
                } else {
                    Ok(Some(slot.insert(node)))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(node);
                Ok(None)
            }
        }
    }

    /// Removes the entry for `key`.  Returns the removed node, if any.
    pub(crate) fn delete(&self, key: &K) -> Option<Arc<Node<K, V>>> {
        let idx = self.shard_index(key);
        self.shards[idx].map.write().remove(key)
    }

    /// Removes `node` only if it is still the entry stored under its key.
    ///
    /// A concurrent update replaces the `Arc` in the map, so an eviction or
    /// sweep arriving late becomes a no-op instead of deleting fresh data.
    pub(crate) fn delete_node(&self, node: &Arc<Node<K, V>>) -> Option<Arc<Node<K, V>>> {
        let idx = self.shard_index(node.key());
        let mut map = self.shards[idx].map.write();
        match map.get(node.key()) {
            Some(current) if Arc::ptr_eq(current, node) => map.remove(node.key()),
            _ => None,
        }
    }

    /// Visits every entry; stops early when `f` returns `false`.
    ///
    /// Each shard is snapshotted under its read lock and visited after the
    /// lock is released, so `f` may call back into the store (deletions do)
    /// and concurrent mutations may or may not be reflected.
    pub(crate) fn range<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Node<K, V>>) -> bool,
    {
        for shard in self.shards.iter() {
            let snapshot: Vec<Arc<Node<K, V>>> = shard.map.read().values().cloned().collect();
            for node in &snapshot {
                if !f(node) {
                    return;
                }
            }
        }
    }

    /// Returns the total number of entries across all shards.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    /// Removes all entries from every shard.
    pub(crate) fn clear(&self) {
        for shard in self.shards.iter() {
            shard.map.write().clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ShardedStore<u64, u64> {
        ShardedStore::new(4, None)
    }

    fn node(key: u64, value: u64) -> Arc<Node<u64, u64>> {
        Arc::new(Node::new(key, value, 0, 1))
    }

    #[test]
    fn set_and_get() {
        let s = store();
        assert!(s.set(node(1, 10)).is_none());
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(10));
        assert!(s.get(&2).is_none());
    }

    #[test]
    fn set_displaces_previous_entry() {
        let s = store();
        s.set(node(1, 10));
        let displaced = s.set(node(1, 20)).expect("first node displaced");
        assert_eq!(*displaced.value(), 10);
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(20));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn set_if_absent_respects_live_incumbent() {
        let s = store();
        assert!(s.set_if_absent(node(1, 10), 0).is_ok());
        assert!(s.set_if_absent(node(1, 20), 0).is_err());
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(10));
    }

    #[test]
    fn set_if_absent_replaces_dead_incumbent() {
        let s = store();
        let first = node(1, 10);
        s.set(Arc::clone(&first));
        first.die();
        let displaced = s.set_if_absent(node(1, 20), 0).expect("dead entry replaced");
        assert!(Arc::ptr_eq(&displaced.expect("displaced node returned"), &first));
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(20));
    }

    #[test]
    fn set_if_absent_replaces_expired_incumbent() {
        let s = store();
        s.set(Arc::new(Node::new(1u64, 10u64, 5, 1)));
        // Before the deadline the incumbent wins; after it the insert does.
        assert!(s.set_if_absent(node(1, 20), 4).is_err());
        assert!(s.set_if_absent(node(1, 20), 5).is_ok());
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(20));
    }

    #[test]
    fn delete_node_is_identity_based() {
        let s = store();
        let first = node(1, 10);
        s.set(Arc::clone(&first));
        s.set(node(1, 20)); // replaces `first`
        assert!(s.delete_node(&first).is_none(), "stale delete must not remove the new entry");
        assert_eq!(s.get(&1).map(|n| *n.value()), Some(20));
        let current = s.get(&1).expect("entry present");
        assert!(s.delete_node(&current).is_some());
        assert!(s.get(&1).is_none());
    }

    #[test]
    fn range_visits_all_and_stops_early() {
        let s = store();
        for i in 0..10u64 {
            s.set(node(i, i));
        }
        let mut seen = 0usize;
        s.range(|_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 10);

        let mut visited = 0usize;
        s.range(|_| {
            visited += 1;
            visited < 3
        });
        assert_eq!(visited, 3);
    }

    #[test]
    fn range_tolerates_reentrant_deletes() {
        let s = store();
        for i in 0..8u64 {
            s.set(node(i, i));
        }
        s.range(|n| {
            s.delete_node(n);
            true
        });
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn clear_empties_every_shard() {
        let s = store();
        for i in 0..100u64 {
            s.set(node(i, i));
        }
        s.clear();
        assert_eq!(s.len(), 0);
    }
}
