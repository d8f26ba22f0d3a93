//! Hierarchical timer wheel for per-entry (variable) TTL.
//!
//! ## Algorithm
//!
//! The wheel has **5 levels**, each a ring of buckets covering a
//! geometrically larger time range:
//!
//! | Level | Buckets | Bucket span | Total range  |
//! |-------|---------|-------------|--------------|
//! | 0     | 64      | 1 s         | ~1 min       |
//! | 1     | 64      | 64 s        | ~68 min      |
//! | 2     | 32      | ~1.1 h      | ~36 h        |
//! | 3     | 4       | ~3 d        | ~12 d        |
//! | 4     | 1       | catch-all   | unbounded    |
//!
//! `schedule` places a node at the finest level whose total range still
//! covers the node's delay.  `advance` walks every bucket whose tick has
//! passed since the previous advance: expired entries are collected,
//! everything else *cascades* down into a finer level where it will be
//! examined again closer to its deadline.
//!
//! The node itself is the source of truth — its deadline is immutable and
//! its `alive` flag marks cancellation — so the wheel needs no side index:
//! dead entries encountered during `advance` are dropped silently.
//!
//! ## References
//! - Varghese & Lauck (1987). *Hashed and Hierarchical Timing Wheels.*

use std::sync::Arc;

use crate::expiry::ExpiryPolicy;
use crate::node::Node;

/// Bucket span in seconds for each level, plus a sentinel.
///
/// Powers of two so tick math reduces to shifts and masks:
///   Level 0: 2^0  = 1 s
///   Level 1: 2^6  = 64 s
///   Level 2: 2^12 ≈ 1.14 h
///   Level 3: 2^18 ≈ 3.03 d
///   Level 4: 2^20 (catch-all)
const SPANS: [u64; 6] = [
    1,
    1 << 6,
    1 << 12,
    1 << 18,
    1 << 20,
    1 << 20, // sentinel (same as level 4)
];

/// Number of buckets per level.
const BUCKET_COUNTS: [usize; 5] = [64, 64, 32, 4, 1];

/// A hierarchical timer wheel tracking nodes by their whole-second
/// deadline.
pub(crate) struct TimerWheel<K, V> {
    /// `wheels[level][bucket]` → nodes whose deadline maps there.
    wheels: [Vec<Vec<Arc<Node<K, V>>>>; 5],
    /// Clock value at the last `advance`, in seconds.
    seconds: u64,
}

impl<K, V> TimerWheel<K, V> {
    /// Creates a new wheel anchored at `start_seconds`.
    pub(crate) fn new(start_seconds: u64) -> Self {
        TimerWheel {
            wheels: [
                vec![Vec::new(); BUCKET_COUNTS[0]],
                vec![Vec::new(); BUCKET_COUNTS[1]],
                vec![Vec::new(); BUCKET_COUNTS[2]],
                vec![Vec::new(); BUCKET_COUNTS[3]],
                vec![Vec::new(); BUCKET_COUNTS[4]],
            ],
            seconds: start_seconds,
        }
    }

    /// Returns `(level, bucket_index)` for a deadline at `expiration`.
    fn bucket_for(&self, expiration: u64) -> (usize, usize) {
        let delay = expiration.saturating_sub(self.seconds);
        for level in 0..5 {
            let span = SPANS[level];
            let range = span.saturating_mul(BUCKET_COUNTS[level] as u64);
            if delay < range || level == 4 {
                let idx = (expiration / span) as usize & (BUCKET_COUNTS[level] - 1);
                return (level, idx);
            }
        }
        (4, 0)
    }

    fn schedule(&mut self, node: Arc<Node<K, V>>) {
        let (level, bucket) = self.bucket_for(node.expiration() as u64);
        self.wheels[level][bucket].push(node);
    }

    /// Advances the wheel to `now`, collecting expired nodes into
    /// `expired` and cascading everything else toward finer levels.
    fn advance(&mut self, now: u64, expired: &mut Vec<Arc<Node<K, V>>>) {
        for level in 0..5 {
            let span = SPANS[level];
            let prev_tick = self.seconds / span;
            let now_tick = now / span;
            if now_tick <= prev_tick {
                // This level hasn't ticked; coarser ones can't have either.
                break;
            }

            // Clamp to one full revolution.
            let ticks_to_walk = (now_tick - prev_tick).min(BUCKET_COUNTS[level] as u64);
            for tick_offset in 1..=ticks_to_walk {
                let tick = prev_tick + tick_offset;
                let bucket_idx = (tick as usize) & (BUCKET_COUNTS[level] - 1);
                let entries = std::mem::take(&mut self.wheels[level][bucket_idx]);

                for node in entries {
                    if !node.is_alive() {
                        continue; // lazily cancelled
                    }
                    if node.expiration() as u64 <= now {
                        expired.push(node);
                    } else {
                        // Not yet due: cascade into the level matching the
                        // remaining delay.
                        self.schedule(node);
                    }
                }
            }
        }
        self.seconds = now;
    }
}

impl<K, V> ExpiryPolicy<K, V> for TimerWheel<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn add(&mut self, node: Arc<Node<K, V>>) {
        if node.expiration() != 0 {
            self.schedule(node);
        }
    }

    fn delete(&mut self, _node: &Arc<Node<K, V>>) {
        // Lazy: the dead node is dropped when its bucket is processed.
    }

    fn remove_expired(&mut self, now: u32, expired: &mut Vec<Arc<Node<K, V>>>) {
        self.advance(now as u64, expired);
    }

    fn clear(&mut self) {
        for level in self.wheels.iter_mut() {
            for bucket in level.iter_mut() {
                bucket.clear();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
