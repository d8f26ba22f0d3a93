//! Write tasks and the MPSC queue that carries them.
//!
//! Every hash-table mutation enqueues a task here so the hot write path
//! never takes the policy mutex; the maintenance thread is the single
//! consumer and applies tasks in batches under one lock acquisition.
//!
//! The queue is a bounded channel: under a pathological write burst
//! producers block briefly instead of growing the queue without bound.
//! The consumer always drains, so producers cannot deadlock.  Control
//! tasks (`Clear`, `Close`) travel in-band and therefore stay ordered
//! with the data tasks that preceded them.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::node::Node;

/// Operations deferred to the maintenance thread.
pub(crate) enum WriteTask<K, V> {
    /// A new entry was inserted into the hash table.
    Add(Arc<Node<K, V>>),
    /// An entry was replaced; `old` has already been marked dead.
    Update {
        new: Arc<Node<K, V>>,
        old: Arc<Node<K, V>>,
    },
    /// An entry was removed (explicitly, or found expired on a get).
    Delete(Arc<Node<K, V>>),
    /// Reset both policies; acknowledged on the done channel.
    Clear,
    /// Like `Clear`, then terminate the maintenance loop.
    Close,
}

/// Bounded MPSC write queue.
///
/// Any number of producer threads may [`push`](WriteQueue::push); the
/// maintenance thread is the only consumer.
pub(crate) struct WriteQueue<K, V> {
    tx: Sender<WriteTask<K, V>>,
    rx: Receiver<WriteTask<K, V>>,
}

impl<K, V> WriteQueue<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        WriteQueue { tx, rx }
    }

    /// Enqueues `task`, blocking while the queue is at capacity.
    #[inline]
    pub(crate) fn push(&self, task: WriteTask<K, V>) {
        // The queue owns both ends, so the channel cannot disconnect while
        // a producer holds a reference to it.
        let _ = self.tx.send(task);
    }

    /// Blocking dequeue.  Consumer side only.
    pub(crate) fn pop(&self) -> Option<WriteTask<K, V>> {
        self.rx.recv().ok()
    }

    /// Non-blocking dequeue.  Consumer side only.
    pub(crate) fn try_pop(&self) -> Option<WriteTask<K, V>> {
        self.rx.try_recv().ok()
    }

    /// Drops everything currently queued.  Used by `Clear`/`Close`, which
    /// erase all preceding not-yet-applied writes.
    pub(crate) fn discard_pending(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}
