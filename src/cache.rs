use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::buffer::read::{fast_rand, ReadBuffer};
use crate::buffer::write::{WriteQueue, WriteTask};
use crate::builder::CacheBuilder;
use crate::clock;
use crate::cost::CostFn;
use crate::expiry::timer_wheel::TimerWheel;
use crate::expiry::{Disabled, ExpiryPolicy, FixedQueue};
use crate::metrics::stats::{Stats, StatsCounter};
use crate::node::Node;
use crate::policy::s3_fifo::S3FifoPolicy;
use crate::store::sharded::ShardedStore;

/// Write tasks applied to the policies per maintenance pass.
const BATCH_CAPACITY: usize = 64;

/// Store shards.  Must be a power of two.
const NUM_SHARDS: usize = 64;

/// Rounds a TTL up to whole seconds.
fn ttl_to_seconds(ttl: Duration) -> u32 {
    let mut seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds.min(u32::MAX as u64) as u32
}

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Both policies live behind the single policy mutex, together with the
/// closed flag the sweeper checks.  Lock order: this mutex is always the
/// innermost lock — no shard lock or channel operation happens while it is
/// held, except the policy calls themselves.
struct PolicyShared<K, V> {
    eviction: S3FifoPolicy<K, V>,
    expiry: Box<dyn ExpiryPolicy<K, V>>,
    closed: bool,
}

struct Workers {
    maintenance: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    /// Dropping this wakes the sweeper out of its one-second sleep.
    sweeper_shutdown: Option<Sender<()>>,
}

/// Shared interior of a [`Cache`].
struct Inner<K, V> {
    store: ShardedStore<K, V>,
    policy: Mutex<PolicyShared<K, V>>,
    read_buffers: Box<[ReadBuffer<K, V>]>,
    /// Always `read_buffers.len() - 1`; the count is a power of two.
    read_buffer_mask: u32,
    write_queue: WriteQueue<K, V>,
    /// Completion channel for `clear`/`close` acknowledgements.
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
    cost_fn: Box<dyn CostFn<K, V>>,
    stats: Option<StatsCounter>,
    capacity: u32,
    /// Copy of the policy's admission bound, readable without the mutex.
    max_available_cost: u32,
    /// Default TTL in whole seconds; `0` = entries don't expire by default.
    ttl: u32,
    with_expiration: bool,
    closed: AtomicBool,
    workers: Mutex<Workers>,
}

impl<K, V> Inner<K, V> {
    #[inline]
    fn record_hit(&self) {
        if let Some(stats) = &self.stats {
            stats.record_hit();
        }
    }

    #[inline]
    fn record_miss(&self) {
        if let Some(stats) = &self.stats {
            stats.record_miss();
        }
    }

    #[inline]
    fn record_evictions(&self, count: u64) {
        if let Some(stats) = &self.stats {
            stats.record_evictions(count);
        }
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A bounded concurrent cache: a sharded hash table bound by an S3-FIFO
/// admission/eviction policy, with optional TTL expiration.
///
/// Reads consult the hash table directly and record the hit in a lossy
/// ring buffer; writes mutate the hash table and queue a task for the
/// maintenance thread, which applies batches to the policy under a single
/// mutex and writes evictions back to the table.  Capacity is therefore a
/// *best-effort* bound: between maintenance passes the table may briefly
/// hold more than `capacity` worth of entries.
///
/// Handles are cheap to clone and share the same cache.  Call
/// [`close`](Cache::close) when done — it stops the worker threads (and
/// the process-wide clock, when this cache was its last user).  `clear`
/// and `close` require the caller to have quiesced the cache; invoking any
/// operation concurrently with them, or after `close`, is unspecified.
///
/// # Example
/// ```
/// use cortado::CacheBuilder;
///
/// let cache: cortado::Cache<String, String> = CacheBuilder::new(100).build();
/// assert!(cache.set("hello".to_string(), "world".to_string()));
/// assert_eq!(cache.get(&"hello".to_string()), Some("world".to_string()));
/// cache.close();
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(builder: CacheBuilder<K, V>) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .next_power_of_two();
        let read_buffer_count = 4 * parallelism;
        let write_queue_capacity = 128 * parallelism;
        let with_expiration = builder.ttl.is_some() || builder.variable_ttl;

        if with_expiration {
            clock::start();
        }

        let expiry: Box<dyn ExpiryPolicy<K, V>> = if builder.ttl.is_some() {
            Box::new(FixedQueue::new())
        } else if builder.variable_ttl {
            Box::new(TimerWheel::new(clock::now() as u64))
        } else {
            Box::new(Disabled)
        };

        let eviction = S3FifoPolicy::new(builder.capacity);
        let max_available_cost = eviction.max_available_cost();

        let read_buffers = (0..read_buffer_count)
            .map(|_| ReadBuffer::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let (done_tx, done_rx) = bounded(1);

        let inner = Arc::new(Inner {
            store: ShardedStore::new(NUM_SHARDS, builder.initial_capacity),
            policy: Mutex::new(PolicyShared {
                eviction,
                expiry,
                closed: false,
            }),
            read_buffers,
            read_buffer_mask: (read_buffer_count - 1) as u32,
            write_queue: WriteQueue::new(write_queue_capacity),
            done_tx,
            done_rx,
            cost_fn: builder.cost_fn,
            stats: builder.stats_enabled.then(StatsCounter::new),
            capacity: builder.capacity,
            max_available_cost,
            ttl: builder.ttl.map(ttl_to_seconds).unwrap_or(0),
            with_expiration,
            closed: AtomicBool::new(false),
            workers: Mutex::new(Workers {
                maintenance: None,
                sweeper: None,
                sweeper_shutdown: None,
            }),
        });

        let maintenance = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || maintenance_loop(inner))
        };
        let mut sweeper = None;
        let mut sweeper_shutdown = None;
        if with_expiration {
            let (tx, rx) = bounded::<()>(1);
            let inner = Arc::clone(&inner);
            sweeper = Some(std::thread::spawn(move || sweeper_loop(inner, rx)));
            sweeper_shutdown = Some(tx);
        }
        *inner.workers.lock() = Workers {
            maintenance: Some(maintenance),
            sweeper,
            sweeper_shutdown,
        };

        Cache { inner }
    }

    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder(capacity: u32) -> CacheBuilder<K, V> {
        CacheBuilder::new(capacity)
    }

    // -----------------------------------------------------------------------
    // Hot path: get
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if it exists, is alive, and has not
    /// expired as of this call.
    pub fn get(&self, key: &K) -> Option<V> {
        let node = match self.inner.store.get(key) {
            Some(node) if node.is_alive() => node,
            _ => {
                self.inner.record_miss();
                return None;
            }
        };

        if node.is_expired(clock::now()) {
            // Logically absent; reclamation is queued rather than done
            // inline so the read path stays write-lock-free.
            self.inner.write_queue.push(WriteTask::Delete(node));
            self.inner.record_miss();
            return None;
        }

        let value = node.value().clone();
        self.after_get(&node);
        self.inner.record_hit();
        Some(value)
    }

    /// Whether a live, unexpired entry exists for `key`.
    ///
    /// Counts as a request in the statistics, like [`get`](Cache::get).
    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn after_get(&self, node: &Arc<Node<K, V>>) {
        let idx = (fast_rand() & self.inner.read_buffer_mask) as usize;
        if let Some(batch) = self.inner.read_buffers[idx].add(node) {
            // This reader drew the full buffer: deliver the batch, then
            // re-open the buffer for the next cycle.
            self.inner.policy.lock().eviction.read(&batch);
            self.inner.read_buffers[idx].free();
        }
    }

    // -----------------------------------------------------------------------
    // Hot path: set
    // -----------------------------------------------------------------------

    /// Associates `value` with `key`, replacing any previous entry.
    ///
    /// Returns `false` when the entry's cost exceeds what the policy could
    /// ever admit; the cache is left unchanged in that case.
    pub fn set(&self, key: K, value: V) -> bool {
        let expiration = self.default_expiration();
        self.set_entry(key, value, expiration, false)
    }

    /// Like [`set`](Cache::set), with a per-entry TTL (rounded up to whole
    /// seconds).  Meaningful on caches built with
    /// [`variable_ttl`](CacheBuilder::variable_ttl).
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> bool {
        let expiration = clock::now().saturating_add(ttl_to_seconds(ttl));
        self.set_entry(key, value, expiration, false)
    }

    /// Inserts only if no live, unexpired entry exists for `key`.
    ///
    /// Returns `false` when such an entry exists, or when the cost is
    /// refused as in [`set`](Cache::set).
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        let expiration = self.default_expiration();
        self.set_entry(key, value, expiration, true)
    }

    /// [`set_if_absent`](Cache::set_if_absent) with a per-entry TTL.
    pub fn set_if_absent_with_ttl(&self, key: K, value: V, ttl: Duration) -> bool {
        let expiration = clock::now().saturating_add(ttl_to_seconds(ttl));
        self.set_entry(key, value, expiration, true)
    }

    fn default_expiration(&self) -> u32 {
        if self.inner.ttl == 0 {
            0
        } else {
            clock::now().saturating_add(self.inner.ttl)
        }
    }

    fn set_entry(&self, key: K, value: V, expiration: u32, only_if_absent: bool) -> bool {
        let cost = self.inner.cost_fn.cost(&key, &value);
        if cost > self.inner.max_available_cost {
            return false;
        }

        let node = Arc::new(Node::new(key, value, expiration, cost));
        if only_if_absent {
            return match self.inner.store.set_if_absent(Arc::clone(&node), clock::now()) {
                Ok(displaced) => {
                    self.after_set(node, displaced);
                    true
                }
                Err(_) => false,
            };
        }

        let displaced = self.inner.store.set(Arc::clone(&node));
        self.after_set(node, displaced);
        true
    }

    fn after_set(&self, node: Arc<Node<K, V>>, displaced: Option<Arc<Node<K, V>>>) {
        match displaced {
            Some(old) => {
                old.die();
                self.inner.write_queue.push(WriteTask::Update { new: node, old });
            }
            None => self.inner.write_queue.push(WriteTask::Add(node)),
        }
    }

    // -----------------------------------------------------------------------
    // Hot path: delete
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`, if present.
    pub fn delete(&self, key: &K) {
        self.after_delete(self.inner.store.delete(key));
    }

    /// Removes every live, unexpired entry for which `f` returns `true`.
    ///
    /// Removal is identity-based, so an entry concurrently replaced by a
    /// fresh `set` is left alone.
    pub fn delete_by_fn<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let now = clock::now();
        self.inner.store.range(|node| {
            if node.is_alive() && !node.is_expired(now) && f(node.key(), node.value()) {
                self.after_delete(self.inner.store.delete_node(node));
            }
            true
        });
    }

    fn after_delete(&self, deleted: Option<Arc<Node<K, V>>>) {
        if let Some(node) = deleted {
            node.die();
            self.inner.write_queue.push(WriteTask::Delete(node));
        }
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    /// Visits every live, unexpired entry; stops early when `f` returns
    /// `false`.  The view is weakly consistent: each key is visited at
    /// most once, concurrent mutations may or may not be reflected.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let now = clock::now();
        self.inner.store.range(|node| {
            if !node.is_alive() || node.is_expired(now) {
                return true;
            }
            f(node.key(), node.value())
        });
    }

    // -----------------------------------------------------------------------
    // Bulk operations & lifecycle
    // -----------------------------------------------------------------------

    /// Removes every entry and resets both policies and the statistics.
    ///
    /// Blocks until the maintenance thread acknowledges the reset.  The
    /// caller must have quiesced the cache.
    pub fn clear(&self) {
        self.clear_with(WriteTask::Clear);
    }

    fn clear_with(&self, task: WriteTask<K, V>) {
        self.inner.store.clear();
        for buffer in self.inner.read_buffers.iter() {
            buffer.clear();
        }

        self.inner.write_queue.push(task);
        let _ = self.inner.done_rx.recv();

        if let Some(stats) = &self.inner.stats {
            stats.clear();
        }
    }

    /// Clears the cache, stops and joins the worker threads, and releases
    /// the process clock if this cache used it.  Idempotent; the caller
    /// must have quiesced the cache, and no operation may be invoked
    /// afterwards.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear_with(WriteTask::Close);

        let mut workers = self.inner.workers.lock();
        if let Some(handle) = workers.maintenance.take() {
            let _ = handle.join();
        }
        workers.sweeper_shutdown.take(); // wakes the sweeper
        if let Some(handle) = workers.sweeper.take() {
            let _ = handle.join();
        }
        drop(workers);

        if self.inner.with_expiration {
            clock::stop();
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Current entry count.  May transiently include evicted or expired
    /// entries that have not been removed from the table yet.
    pub fn size(&self) -> usize {
        self.inner.store.len()
    }

    /// The configured aggregate cost bound.
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// A snapshot of the cumulative statistics.  All-zero when the cache
    /// was built without [`stats_enabled`](CacheBuilder::stats_enabled).
    pub fn stats(&self) -> Stats {
        self.inner
            .stats
            .as_ref()
            .map(StatsCounter::snapshot)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Maintenance loop
// ---------------------------------------------------------------------------

/// Single consumer of the write queue; the only code path that mutates the
/// eviction policy's queues.
///
/// Tasks are batched up to [`BATCH_CAPACITY`] so the policy mutex is taken
/// once per batch under load, but a partial batch is applied as soon as the
/// queue runs empty — at quiescence every queued write has reached the
/// policy, which is what makes the capacity bound observable.
fn maintenance_loop<K, V>(inner: Arc<Inner<K, V>>)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut batch: Vec<WriteTask<K, V>> = Vec::with_capacity(BATCH_CAPACITY);
    let mut evictions: Vec<Arc<Node<K, V>>> = Vec::with_capacity(BATCH_CAPACITY);

    loop {
        let task = if batch.is_empty() {
            match inner.write_queue.pop() {
                Some(task) => task,
                None => return,
            }
        } else {
            match inner.write_queue.try_pop() {
                Some(task) => task,
                None => {
                    apply_batch(&inner, &mut batch, &mut evictions);
                    continue;
                }
            }
        };

        match task {
            control @ (WriteTask::Clear | WriteTask::Close) => {
                let closing = matches!(control, WriteTask::Close);
                // The table was already cleared by the caller; pending and
                // concurrently queued writes are void.
                batch.clear();
                inner.write_queue.discard_pending();

                {
                    let mut shared = inner.policy.lock();
                    shared.eviction.clear();
                    shared.expiry.clear();
                    if closing {
                        shared.closed = true;
                    }
                }

                let _ = inner.done_tx.send(());
                if closing {
                    return;
                }
            }
            task => {
                batch.push(task);
                if batch.len() >= BATCH_CAPACITY {
                    apply_batch(&inner, &mut batch, &mut evictions);
                }
            }
        }
    }
}

fn apply_batch<K, V>(
    inner: &Inner<K, V>,
    batch: &mut Vec<WriteTask<K, V>>,
    evictions: &mut Vec<Arc<Node<K, V>>>,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    {
        let mut shared = inner.policy.lock();
        let shared = &mut *shared;

        for task in batch.iter() {
            match task {
                WriteTask::Delete(node) => shared.expiry.delete(node),
                WriteTask::Add(node) => {
                    if node.is_alive() {
                        shared.expiry.add(Arc::clone(node));
                    }
                }
                WriteTask::Update { new, old } => {
                    shared.expiry.delete(old);
                    if new.is_alive() {
                        shared.expiry.add(Arc::clone(new));
                    }
                }
                WriteTask::Clear | WriteTask::Close => {}
            }
        }

        shared.eviction.write(evictions, batch);
        for node in evictions.iter() {
            shared.expiry.delete(node);
        }
    }

    // Mutex released: write evictions back to the table.  Identity-based,
    // so a concurrently updated key keeps its fresh entry.
    for node in evictions.iter() {
        inner.store.delete_node(node);
        node.die();
    }
    if !evictions.is_empty() {
        inner.record_evictions(evictions.len() as u64);
    }

    batch.clear();
    evictions.clear();
}

// ---------------------------------------------------------------------------
// Expiration sweeper
// ---------------------------------------------------------------------------

/// Once-a-second reclamation of expired entries.  The get path filters
/// expired entries inline between sweeps, so the cadence bounds CPU cost
/// without affecting what callers observe.
fn sweeper_loop<K, V>(inner: Arc<Inner<K, V>>, shutdown: Receiver<()>)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut expired: Vec<Arc<Node<K, V>>> = Vec::with_capacity(128);
    loop {
        match shutdown.recv_timeout(Duration::from_secs(1)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        {
            let mut shared = inner.policy.lock();
            if shared.closed {
                return;
            }
            let shared = &mut *shared;
            shared.expiry.remove_expired(clock::now(), &mut expired);
            shared.eviction.delete_all(&expired);
        }

        for node in expired.drain(..) {
            inner.store.delete_node(&node);
            node.die();
        }
    }
}
