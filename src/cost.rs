//! Entry cost function — assigns each entry's contribution to capacity.
//!
//! The cache enforces `Σ cost(entry) ≤ capacity`.  By default every entry
//! costs 1 unit ([`UnitCost`]), so `capacity` is simply the maximum number
//! of entries.  A custom cost function bounds memory consumption instead of
//! entry count.  An entry whose cost exceeds the policy's maximum available
//! cost is refused outright by `set` and friends.
//!
//! # Example
//! ```
//! use cortado::CacheBuilder;
//!
//! // Cap at ~10 MB total value size (keys are not counted).
//! let cache: cortado::Cache<String, Vec<u8>> = CacheBuilder::new(10 * 1024 * 1024)
//!     .cost_fn(|_key: &String, val: &Vec<u8>| val.len() as u32 + 1)
//!     .build();
//! cache.close();
//! ```

/// Computes the cost of a cache entry.
pub trait CostFn<K, V>: Send + Sync + 'static {
    fn cost(&self, key: &K, value: &V) -> u32;
}

// ---------------------------------------------------------------------------
// Built-in implementations
// ---------------------------------------------------------------------------

/// Every entry costs exactly 1 unit.  This is the default.
pub struct UnitCost;

impl<K, V> CostFn<K, V> for UnitCost {
    #[inline]
    fn cost(&self, _key: &K, _value: &V) -> u32 {
        1
    }
}

/// A cost function backed by a closure.
///
/// Created via [`CacheBuilder::cost_fn`](crate::CacheBuilder::cost_fn).
pub struct FnCost<F>(pub F);

impl<K, V, F> CostFn<K, V> for FnCost<F>
where
    F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
{
    #[inline]
    fn cost(&self, key: &K, value: &V) -> u32 {
        (self.0)(key, value)
    }
}
