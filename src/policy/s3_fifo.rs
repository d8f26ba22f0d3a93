//! S3-FIFO eviction/admission policy.
//!
//! Three queues approximate scan-resistant LFU at FIFO cost:
//!
//! - **Small** (10 % of capacity) receives first-time insertions.  Entries
//!   that were never read again are evicted from here quickly — one-hit
//!   wonders never pollute the main queue.
//! - **Main** (the rest) holds entries that proved themselves: small-queue
//!   victims with a nonzero access frequency are promoted instead of
//!   evicted, and main-queue victims with a nonzero frequency are given
//!   another lap with the frequency decremented (CLOCK-style).
//! - **Ghost** remembers the key hashes of recent small-queue evictions.
//!   A re-inserted ghost skips the small queue and is admitted straight
//!   into main.
//!
//! All methods are called under the policy mutex: `read` from whichever
//! reader drained a full read buffer, everything else from the maintenance
//! and sweeper threads.  Entries removed behind the policy's back (deleted,
//! updated, expired) are *forgotten* in O(1) by clearing the node's queue
//! tag and subtracting its cost; the stale queue slot is skipped when the
//! FIFO reaches it, the same lazy discipline the timer wheel uses.
//!
//! References: Yang et al., "FIFO queues are all you need for cache
//! eviction", SOSP 2023.

use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use ahash::{AHashSet, RandomState};

use crate::buffer::write::WriteTask;
use crate::node::{Location, Node};

pub(crate) struct S3FifoPolicy<K, V> {
    small: VecDeque<Arc<Node<K, V>>>,
    main: VecDeque<Arc<Node<K, V>>>,
    ghost: GhostQueue,
    small_cost: u64,
    main_cost: u64,
    max_cost: u64,
    small_max_cost: u64,
    build_hasher: RandomState,
}

impl<K: Hash + Eq, V> S3FifoPolicy<K, V> {
    pub(crate) fn new(capacity: u32) -> Self {
        let max_cost = capacity as u64;
        let small_max_cost = max_cost / 10;
        let ghost_capacity = (max_cost - small_max_cost) as usize;
        S3FifoPolicy {
            small: VecDeque::new(),
            main: VecDeque::new(),
            ghost: GhostQueue::new(ghost_capacity),
            small_cost: 0,
            main_cost: 0,
            max_cost,
            small_max_cost,
            build_hasher: RandomState::new(),
        }
    }

    /// Largest cost a single entry may carry and still be admissible.
    ///
    /// Entries above this could never survive in the main queue, so the
    /// cache refuses them before they reach the hash table.
    pub(crate) fn max_available_cost(&self) -> u32 {
        (self.max_cost - self.small_max_cost) as u32
    }

    /// Applies a batch of read hits: frequency bumps only.
    ///
    /// Read events are hints — a dropped or reordered batch costs hit
    /// ratio, never correctness.
    pub(crate) fn read(&mut self, batch: &[Arc<Node<K, V>>]) {
        for node in batch {
            if node.is_alive() {
                node.touch();
            }
        }
    }

    /// Applies a batch of write tasks, then evicts until the aggregate
    /// cost is back within capacity.  Chosen victims are appended to
    /// `evictions`; the caller removes them from the hash table.
    pub(crate) fn write(
        &mut self,
        evictions: &mut Vec<Arc<Node<K, V>>>,
        tasks: &[WriteTask<K, V>],
    ) {
        for task in tasks {
            match task {
                WriteTask::Add(node) => {
                    if node.is_alive() {
                        self.admit(Arc::clone(node));
                    }
                }
                WriteTask::Update { new, old } => {
                    let was = self.forget(old);
                    if new.is_alive() {
                        match was {
                            // Keep the entry's standing: an update is not a
                            // fresh arrival that must re-earn promotion.
                            Location::Small | Location::Main => {
                                self.push_to(was, Arc::clone(new))
                            }
                            Location::Unknown => self.admit(Arc::clone(new)),
                        }
                    }
                }
                WriteTask::Delete(node) => {
                    self.forget(node);
                }
                // Control tasks never reach a write batch.
                WriteTask::Clear | WriteTask::Close => {}
            }
        }
        self.rebalance(evictions);
    }

    /// Forgets every node in `nodes` (used by the expiration sweeper).
    pub(crate) fn delete_all(&mut self, nodes: &[Arc<Node<K, V>>]) {
        for node in nodes {
            self.forget(node);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.small.clear();
        self.main.clear();
        self.ghost.clear();
        self.small_cost = 0;
        self.main_cost = 0;
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admits a first-time (or returning) entry: recent ghosts go straight
    /// to main, everything else starts in small.
    fn admit(&mut self, node: Arc<Node<K, V>>) {
        let target = if self.ghost.contains(self.hash(&node)) {
            Location::Main
        } else {
            Location::Small
        };
        self.push_to(target, node);
    }

    fn push_to(&mut self, location: Location, node: Arc<Node<K, V>>) {
        node.set_location(location);
        let cost = node.cost() as u64;
        match location {
            Location::Small => {
                self.small_cost += cost;
                self.small.push_back(node);
            }
            Location::Main => {
                self.main_cost += cost;
                self.main.push_back(node);
            }
            Location::Unknown => {}
        }
    }

    /// Stops accounting for `node`.  Returns where it used to live.
    fn forget(&mut self, node: &Arc<Node<K, V>>) -> Location {
        let location = node.location();
        match location {
            Location::Small => {
                self.small_cost = self.small_cost.saturating_sub(node.cost() as u64);
                node.set_location(Location::Unknown);
            }
            Location::Main => {
                self.main_cost = self.main_cost.saturating_sub(node.cost() as u64);
                node.set_location(Location::Unknown);
            }
            Location::Unknown => {}
        }
        location
    }

    #[inline]
    fn hash(&self, node: &Arc<Node<K, V>>) -> u64 {
        self.build_hasher.hash_one(node.key())
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    fn rebalance(&mut self, evictions: &mut Vec<Arc<Node<K, V>>>) {
        while self.small_cost + self.main_cost > self.max_cost {
            let evicted = if self.small_cost >= self.small_max_cost || self.main.is_empty() {
                self.evict_from_small(evictions) || self.evict_from_main(evictions)
            } else {
                self.evict_from_main(evictions) || self.evict_from_small(evictions)
            };
            if !evicted {
                break;
            }
        }
    }

    /// Pops small-queue entries until one is evicted.  Entries read at
    /// least once are promoted to main (frequency reset) rather than
    /// evicted; evicted keys are remembered in the ghost queue.
    fn evict_from_small(&mut self, evictions: &mut Vec<Arc<Node<K, V>>>) -> bool {
        while let Some(node) = self.small.pop_front() {
            if node.location() != Location::Small {
                continue; // forgotten or already moved — stale slot
            }
            if !node.is_alive() {
                self.forget(&node);
                continue;
            }
            let cost = node.cost() as u64;
            if node.frequency() > 0 {
                node.set_frequency(0);
                node.set_location(Location::Main);
                self.small_cost = self.small_cost.saturating_sub(cost);
                self.main_cost += cost;
                self.main.push_back(node);
                continue;
            }
            self.small_cost = self.small_cost.saturating_sub(cost);
            node.set_location(Location::Unknown);
            let hash = self.hash(&node);
            self.ghost.record(hash);
            evictions.push(node);
            return true;
        }
        false
    }

    /// Pops main-queue entries until one is evicted.  Entries with a
    /// nonzero frequency get reinserted at the tail with one less lap —
    /// frequencies strictly decrease, so this terminates.
    fn evict_from_main(&mut self, evictions: &mut Vec<Arc<Node<K, V>>>) -> bool {
        while let Some(node) = self.main.pop_front() {
            if node.location() != Location::Main {
                continue;
            }
            if !node.is_alive() {
                self.forget(&node);
                continue;
            }
            let frequency = node.frequency();
            if frequency > 0 {
                node.set_frequency(frequency - 1);
                self.main.push_back(node);
                continue;
            }
            self.main_cost = self.main_cost.saturating_sub(node.cost() as u64);
            node.set_location(Location::Unknown);
            evictions.push(node);
            return true;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Ghost queue
// ---------------------------------------------------------------------------

/// Bounded FIFO of evicted-key hashes, used for ghost-guided admission.
///
/// Stores hashes rather than keys: a false positive merely admits one
/// entry into main early.
struct GhostQueue {
    entries: VecDeque<u64>,
    index: AHashSet<u64>,
    capacity: usize,
}

impl GhostQueue {
    fn new(capacity: usize) -> Self {
        GhostQueue {
            entries: VecDeque::new(),
            index: AHashSet::new(),
            capacity,
        }
    }

    fn record(&mut self, hash: u64) {
        if self.capacity == 0 || !self.index.insert(hash) {
            return;
        }
        self.entries.push_back(hash);
        if self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                self.index.remove(&oldest);
            }
        }
    }

    #[inline]
    fn contains(&self, hash: u64) -> bool {
        self.index.contains(&hash)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: u64, cost: u32) -> Arc<Node<u64, u64>> {
        Arc::new(Node::new(key, key, 0, cost))
    }

    fn add(node: &Arc<Node<u64, u64>>) -> WriteTask<u64, u64> {
        WriteTask::Add(Arc::clone(node))
    }

    fn apply(policy: &mut S3FifoPolicy<u64, u64>, tasks: &[WriteTask<u64, u64>]) -> Vec<Arc<Node<u64, u64>>> {
        let mut evictions = Vec::new();
        policy.write(&mut evictions, tasks);
        evictions
    }

    #[test]
    fn within_capacity_nothing_is_evicted() {
        let mut policy = S3FifoPolicy::new(10);
        let nodes: Vec<_> = (0..10).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = nodes.iter().map(add).collect();
        assert!(apply(&mut policy, &tasks).is_empty());
    }

    #[test]
    fn over_capacity_evicts_oldest_unread() {
        let mut policy = S3FifoPolicy::new(3);
        let nodes: Vec<_> = (0..4).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = nodes.iter().map(add).collect();
        let evicted = apply(&mut policy, &tasks);
        assert_eq!(evicted.len(), 1);
        assert_eq!(*evicted[0].key(), 0, "first-in unread entry is the victim");
    }

    #[test]
    fn read_entries_are_promoted_not_evicted() {
        let mut policy = S3FifoPolicy::new(10);
        let nodes: Vec<_> = (0..10).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = nodes.iter().map(add).collect();
        apply(&mut policy, &tasks);

        // Entry 0 is read; a wave of new entries should not push it out.
        policy.read(&[Arc::clone(&nodes[0])]);
        let fresh: Vec<_> = (100..110).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = fresh.iter().map(add).collect();
        let evicted = apply(&mut policy, &tasks);
        assert!(
            evicted.iter().all(|n| *n.key() != 0),
            "read entry must survive the scan"
        );
        assert_eq!(nodes[0].location(), Location::Main, "survivor is promoted to main");
    }

    #[test]
    fn ghost_readmission_goes_to_main() {
        let mut policy = S3FifoPolicy::new(3);
        let first = node(0, 1);
        let filler: Vec<_> = (1..4).map(|i| node(i, 1)).collect();
        let mut tasks = vec![add(&first)];
        tasks.extend(filler.iter().map(add));
        let evicted = apply(&mut policy, &tasks);
        assert_eq!(*evicted[0].key(), 0);

        // Key 0 comes back while its ghost is still remembered.
        let reborn = node(0, 1);
        apply(&mut policy, &[add(&reborn)]);
        assert_eq!(reborn.location(), Location::Main);
    }

    #[test]
    fn delete_releases_cost() {
        let mut policy = S3FifoPolicy::new(3);
        let nodes: Vec<_> = (0..3).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = nodes.iter().map(add).collect();
        apply(&mut policy, &tasks);

        nodes[0].die();
        let delete = WriteTask::Delete(Arc::clone(&nodes[0]));
        let replacement = node(9, 1);
        let evicted = apply(&mut policy, &[delete, add(&replacement)]);
        assert!(evicted.is_empty(), "deleted entry's cost must make room");
    }

    #[test]
    fn update_keeps_queue_standing() {
        let mut policy = S3FifoPolicy::new(10);
        let old = node(1, 2);
        apply(&mut policy, &[add(&old)]);
        assert_eq!(old.location(), Location::Small);

        old.die();
        let new = node(1, 4);
        let update = WriteTask::Update {
            new: Arc::clone(&new),
            old: Arc::clone(&old),
        };
        apply(&mut policy, &[update]);
        assert_eq!(old.location(), Location::Unknown);
        assert_eq!(new.location(), Location::Small);
        assert_eq!(policy.small_cost, 4, "cost swapped from old to new");
    }

    #[test]
    fn max_available_cost_is_main_capacity() {
        let policy: S3FifoPolicy<u64, u64> = S3FifoPolicy::new(100);
        assert_eq!(policy.max_available_cost(), 90);
        let tiny: S3FifoPolicy<u64, u64> = S3FifoPolicy::new(5);
        assert_eq!(tiny.max_available_cost(), 5);
    }

    #[test]
    fn weighted_costs_bound_the_total() {
        let mut policy = S3FifoPolicy::new(10);
        let heavy: Vec<_> = (0..5).map(|i| node(i, 3)).collect();
        let tasks: Vec<_> = heavy.iter().map(add).collect();
        let evicted = apply(&mut policy, &tasks);
        assert!(policy.small_cost + policy.main_cost <= 10);
        assert!(!evicted.is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut policy = S3FifoPolicy::new(3);
        let nodes: Vec<_> = (0..4).map(|i| node(i, 1)).collect();
        let tasks: Vec<_> = nodes.iter().map(add).collect();
        apply(&mut policy, &tasks);
        policy.clear();
        assert_eq!(policy.small_cost + policy.main_cost, 0);
        // A previously-ghosted key is admitted like a stranger again.
        let reborn = node(0, 1);
        apply(&mut policy, &[add(&reborn)]);
        assert_eq!(reborn.location(), Location::Small);
    }
}
