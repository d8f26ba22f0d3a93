use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Access-frequency ceiling (2 bits' worth, as in the S3-FIFO paper).
pub(crate) const MAX_FREQUENCY: u8 = 3;

/// Which eviction-policy queue currently accounts for a node's cost.
///
/// Written only under the policy mutex; stored as an atomic byte so nodes
/// stay `Sync` without wrapping every field in a lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Location {
    /// Not tracked by the policy (never admitted, or already forgotten).
    Unknown,
    Small,
    Main,
}

impl Location {
    fn from_u8(raw: u8) -> Location {
        match raw {
            1 => Location::Small,
            2 => Location::Main,
            _ => Location::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Location::Unknown => 0,
            Location::Small => 1,
            Location::Main => 2,
        }
    }
}

/// A single cache entry, shared as `Arc<Node>` between the hash table, the
/// read buffers, the write queue, and the policy queues.
///
/// `key`, `value`, `expiration`, and `cost` are immutable after creation —
/// an update always allocates a fresh node and retires the old one.  The
/// mutable parts (`alive`, `frequency`, `location`) are bookkeeping bytes.
#[derive(Debug)]
pub(crate) struct Node<K, V> {
    key: K,
    value: V,
    /// Whole seconds since the process clock started; `0` = never expires.
    expiration: u32,
    cost: u32,
    /// One-way flag: flips to `false` exactly once, when the entry leaves
    /// the hash table.  Readers treat a dead node as absent.
    alive: AtomicBool,
    frequency: AtomicU8,
    location: AtomicU8,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V, expiration: u32, cost: u32) -> Self {
        Node {
            key,
            value,
            expiration,
            cost,
            alive: AtomicBool::new(true),
            frequency: AtomicU8::new(0),
            location: AtomicU8::new(Location::Unknown.as_u8()),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub(crate) fn expiration(&self) -> u32 {
        self.expiration
    }

    #[inline]
    pub(crate) fn cost(&self) -> u32 {
        self.cost
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Marks the node as removed.  Idempotent; readers observing the flag
    /// must treat the node as absent from that point on.
    #[inline]
    pub(crate) fn die(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// `true` once the entry's deadline has been reached (`expiration` is
    /// inclusive: a node expiring exactly at `now` is already expired).
    #[inline]
    pub(crate) fn is_expired(&self, now: u32) -> bool {
        self.expiration != 0 && self.expiration <= now
    }

    #[inline]
    pub(crate) fn frequency(&self) -> u8 {
        self.frequency.load(Ordering::Relaxed)
    }

    /// Records one access, saturating at [`MAX_FREQUENCY`].
    #[inline]
    pub(crate) fn touch(&self) {
        let frequency = self.frequency.load(Ordering::Relaxed);
        if frequency < MAX_FREQUENCY {
            self.frequency.store(frequency + 1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn set_frequency(&self, frequency: u8) {
        self.frequency.store(frequency, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn location(&self) -> Location {
        Location::from_u8(self.location.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_location(&self, location: Location) {
        self.location.store(location.as_u8(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn die_is_one_way() {
        let node = Node::new("k", 1u32, 0, 1);
        assert!(node.is_alive());
        node.die();
        assert!(!node.is_alive());
        node.die(); // second call is a no-op
        assert!(!node.is_alive());
    }

    #[test]
    fn expiration_zero_never_expires() {
        let node = Node::new("k", 1u32, 0, 1);
        assert!(!node.is_expired(0));
        assert!(!node.is_expired(u32::MAX));
    }

    #[test]
    fn expiration_is_inclusive() {
        let node = Node::new("k", 1u32, 10, 1);
        assert!(!node.is_expired(9));
        assert!(node.is_expired(10), "deadline exactly at now counts as expired");
        assert!(node.is_expired(11));
    }

    #[test]
    fn frequency_saturates() {
        let node = Node::new("k", 1u32, 0, 1);
        for _ in 0..10 {
            node.touch();
        }
        assert_eq!(node.frequency(), MAX_FREQUENCY);
        node.set_frequency(0);
        assert_eq!(node.frequency(), 0);
    }
}
