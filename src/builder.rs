use std::hash::Hash;
use std::time::Duration;

use crate::cache::Cache;
use crate::cost::{CostFn, FnCost, UnitCost};

/// Builder for configuring and constructing a [`Cache`].
///
/// # Example
/// ```
/// use cortado::CacheBuilder;
/// use std::time::Duration;
///
/// let cache: cortado::Cache<String, String> = CacheBuilder::new(1_000)
///     .time_to_live(Duration::from_secs(60))
///     .stats_enabled()
///     .build();
/// cache.close();
/// ```
pub struct CacheBuilder<K, V> {
    pub(crate) capacity: u32,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) stats_enabled: bool,
    pub(crate) ttl: Option<Duration>,
    pub(crate) variable_ttl: bool,
    pub(crate) cost_fn: Box<dyn CostFn<K, V>>,
}

impl<K: 'static, V: 'static> CacheBuilder<K, V> {
    /// `capacity` bounds the aggregate cost of admitted entries (entry
    /// count, with the default unit cost function).
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        CacheBuilder {
            capacity,
            initial_capacity: None,
            stats_enabled: false,
            ttl: None,
            variable_ttl: false,
            cost_fn: Box::new(UnitCost),
        }
    }

    /// Pre-sizes the hash table for roughly `n` entries.
    pub fn initial_capacity(mut self, n: usize) -> Self {
        self.initial_capacity = Some(n);
        self
    }

    /// Counts hits, misses, and evictions (off by default; the counters
    /// cost one relaxed atomic increment per operation).
    pub fn stats_enabled(mut self) -> Self {
        self.stats_enabled = true;
        self
    }

    /// Every entry expires `ttl` after it was written (or replaced),
    /// rounded up to whole seconds.
    ///
    /// Takes precedence over [`variable_ttl`](Self::variable_ttl) if both
    /// are configured.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        assert!(ttl > Duration::ZERO, "ttl must be positive");
        self.ttl = Some(ttl);
        self
    }

    /// Entries may carry their own TTL, supplied per call via
    /// [`Cache::set_with_ttl`](crate::Cache::set_with_ttl); entries set
    /// without one never expire.
    pub fn variable_ttl(mut self) -> Self {
        self.variable_ttl = true;
        self
    }

    /// Set a custom entry cost via closure.
    ///
    /// # Example
    /// ```
    /// use cortado::CacheBuilder;
    ///
    /// let cache: cortado::Cache<String, Vec<u8>> = CacheBuilder::new(4096)
    ///     .cost_fn(|_k: &String, v: &Vec<u8>| v.len() as u32 + 1)
    ///     .build();
    /// cache.close();
    /// ```
    pub fn cost_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
    {
        self.cost_fn = Box::new(FnCost(f));
        self
    }

    /// Set a cost function using any type that implements [`CostFn`].
    pub fn cost_fn_impl<C: CostFn<K, V>>(mut self, c: C) -> Self {
        self.cost_fn = Box::new(c);
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn build(self) -> Cache<K, V> {
        Cache::new(self)
    }
}
