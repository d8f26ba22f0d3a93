//! Lossy per-shard read buffers.
//!
//! Cache hits are recorded by adding the hit node to one of several ring
//! buffers — a single atomic increment plus one atomic swap, with **no
//! mutex acquisition**.  The cache keeps `4 × parallelism` buffers and
//! picks one per hit with a thread-local xorshift PRNG, so reader threads
//! spread out instead of colliding on one counter.
//!
//! ## Batch handover
//!
//! Unlike a drain-on-demand ring, ownership of a full buffer transfers at
//! the moment it fills: the `add` call that claims the **last** free slot
//! receives the whole batch and is responsible for delivering it to the
//! eviction policy.  Until that reader calls [`ReadBuffer::free`], the
//! buffer is locked out and further `add` calls drop their hint silently —
//! read events are hints, losing one costs a little hit-ratio quality and
//! nothing else.
//!
//! ## Known race
//!
//! A writer claims a slot with one atomic op and publishes the node pointer
//! with a second.  The reader that fills the buffer may drain a slot before
//! its writer published; the drain skips the empty slot and the straggler's
//! pointer stays in place until the slot is reused or the buffer is cleared
//! (every slot transition is a `swap`, so the reference is released exactly
//! once either way).  Bounded, intentional loss — same discipline as
//! dropping on overflow.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::node::Node;

/// Capacity of each ring buffer.  Must be a power of two.
pub(crate) const BUFFER_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Fast per-thread random buffer selection
// ---------------------------------------------------------------------------

/// Seeds successive threads with distinct odd values (golden-ratio steps).
static SEED_COUNTER: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);

thread_local! {
    static RNG_STATE: Cell<u64> =
        Cell::new(SEED_COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed) | 1);
}

/// Cheap thread-local xorshift64.  Quality only matters for spreading
/// readers across buffers, not for anything adversarial.
#[inline]
pub(crate) fn fast_rand() -> u32 {
    RNG_STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 32) as u32
    })
}

// ---------------------------------------------------------------------------
// ReadBuffer
// ---------------------------------------------------------------------------

/// One fixed-capacity, lossy ring of read-hit nodes.
///
/// Padded to 64 bytes to avoid false-sharing between neighboring buffers.
#[repr(align(64))]
pub(crate) struct ReadBuffer<K, V> {
    /// Number of slot claims.  Saturating past the capacity means the
    /// buffer is full (or its batch is still out) and hints are dropped.
    count: AtomicUsize,
    /// Raw `Arc<Node>` pointers; null is the sentinel for "empty slot".
    slots: [AtomicPtr<Node<K, V>>; BUFFER_CAPACITY],
    /// The slots logically own `Arc<Node<K, V>>` references.
    _owns: PhantomData<Arc<Node<K, V>>>,
}

impl<K, V> ReadBuffer<K, V> {
    pub(crate) fn new() -> Self {
        ReadBuffer {
            count: AtomicUsize::new(0),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            _owns: PhantomData,
        }
    }

    /// Records a read hit.
    ///
    /// Returns the drained batch exactly when this call fills the buffer;
    /// the caller then owns delivery and must call [`free`](Self::free)
    /// afterwards.  Returns `None` (dropping the hint) while the buffer is
    /// full or its previous batch has not been freed yet.
    pub(crate) fn add(&self, node: &Arc<Node<K, V>>) -> Option<Vec<Arc<Node<K, V>>>> {
        let claimed = self.count.fetch_add(1, Ordering::Acquire);
        if claimed >= BUFFER_CAPACITY {
            return None; // full — drop silently
        }

        let raw = Arc::into_raw(Arc::clone(node)).cast_mut();
        let previous = self.slots[claimed].swap(raw, Ordering::AcqRel);
        if !previous.is_null() {
            // A straggler from the previous cycle published after that
            // cycle's drain; its reference is released here.
            // SAFETY: every non-null slot value came from Arc::into_raw and
            // is taken out exactly once (all transitions are swaps).
            unsafe { drop(Arc::from_raw(previous)) };
        }

        if claimed + 1 == BUFFER_CAPACITY {
            return Some(self.drain());
        }
        None
    }

    /// Snapshots and empties every slot.  Only the reader that filled the
    /// buffer reaches this, so there is exactly one drainer per cycle.
    fn drain(&self) -> Vec<Arc<Node<K, V>>> {
        let mut batch = Vec::with_capacity(BUFFER_CAPACITY);
        for slot in &self.slots {
            let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                // SAFETY: see `add` — the swap transfers the reference.
                batch.push(unsafe { Arc::from_raw(raw) });
            }
        }
        batch
    }

    /// Marks the handed-out batch as consumed, re-opening the buffer.
    #[inline]
    pub(crate) fn free(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Empties the buffer without delivering and unlocks it.
    pub(crate) fn clear(&self) {
        drop(self.drain());
        self.count.store(0, Ordering::Release);
    }
}

impl<K, V> Drop for ReadBuffer<K, V> {
    fn drop(&mut self) {
        // Release any references still parked in slots (stragglers, or a
        // buffer dropped between fill and free).
        drop(self.drain());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
