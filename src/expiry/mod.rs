//! Expiration policies: how entries with a deadline are found and removed.
//!
//! The sweeper thread calls [`ExpiryPolicy::remove_expired`] roughly once a
//! second; the get path filters stale entries inline in between, so a late
//! sweep only delays reclamation, never correctness.
//!
//! Deletion is **lazy** in every implementation: the node's immutable
//! `expiration` and one-way `alive` flag are canonical, so a cancelled
//! (deleted/updated) entry is simply skipped when its slot comes up.  This
//! also keeps entries that were only forgotten by the eviction policy
//! reachable until the sweep drops them from the hash table.

pub mod timer_wheel;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::node::Node;

/// Capability set shared by the disabled, fixed-TTL, and variable-TTL
/// implementations.  All methods run under the policy mutex.
pub(crate) trait ExpiryPolicy<K, V>: Send {
    /// Starts tracking a newly admitted node.
    fn add(&mut self, node: Arc<Node<K, V>>);

    /// Stops tracking a removed node.  Implementations may defer the
    /// physical removal — the node's `alive` flag makes stale slots
    /// recognizable.
    fn delete(&mut self, node: &Arc<Node<K, V>>);

    /// Collects every tracked node whose deadline has passed into
    /// `expired`.  The caller removes them from the eviction policy and
    /// the hash table.
    fn remove_expired(&mut self, now: u32, expired: &mut Vec<Arc<Node<K, V>>>);

    /// Drops all tracked nodes.
    fn clear(&mut self);
}

// ---------------------------------------------------------------------------
// Disabled
// ---------------------------------------------------------------------------

/// No expiration: every method is a no-op.
pub(crate) struct Disabled;

impl<K, V> ExpiryPolicy<K, V> for Disabled
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn add(&mut self, _node: Arc<Node<K, V>>) {}
    fn delete(&mut self, _node: &Arc<Node<K, V>>) {}
    fn remove_expired(&mut self, _now: u32, _expired: &mut Vec<Arc<Node<K, V>>>) {}
    fn clear(&mut self) {}
}

// ---------------------------------------------------------------------------
// Fixed TTL
// ---------------------------------------------------------------------------

/// Expiration for a uniform TTL: every entry lives the same duration, so
/// insertion order *is* expiration order and a plain FIFO suffices — pop
/// from the front while the front is expired.
///
/// Dead nodes (deleted or displaced before their deadline) are purged when
/// they reach the front; until then they only hold their slot.
pub(crate) struct FixedQueue<K, V> {
    queue: VecDeque<Arc<Node<K, V>>>,
}

impl<K, V> FixedQueue<K, V> {
    pub(crate) fn new() -> Self {
        FixedQueue {
            queue: VecDeque::new(),
        }
    }
}

impl<K, V> ExpiryPolicy<K, V> for FixedQueue<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn add(&mut self, node: Arc<Node<K, V>>) {
        if node.expiration() != 0 {
            self.queue.push_back(node);
        }
    }

    fn delete(&mut self, _node: &Arc<Node<K, V>>) {
        // Lazy: the dead node is dropped when it reaches the front.
    }

    fn remove_expired(&mut self, now: u32, expired: &mut Vec<Arc<Node<K, V>>>) {
        loop {
            let (dead, due) = match self.queue.front() {
                Some(node) => (!node.is_alive(), node.is_expired(now)),
                None => break,
            };
            if dead {
                self.queue.pop_front();
                continue;
            }
            if !due {
                break;
            }
            if let Some(node) = self.queue.pop_front() {
                expired.push(node);
            }
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
