#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! `MetricsCache` is a small, bounded, LRU-evicted map from synthetic keys
//! (`"<vertexKey>/pending"`, `"<vertexKey>/length"`) to integer values.
//!
//! It is the cross-vertex shared view that lets the back-pressure detector
//! for vertex A read totals written during a *different* vertex's (B's)
//! evaluation, without any blocking coordination between them. A missing or
//! stale entry simply disables the optimization for that edge — this cache
//! has no TTL and makes no freshness guarantee beyond "written at some
//! point during a recent rotation."

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Default capacity, matching `spec.md` §2 ("~10 000 entries").
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Builds the cache key under which a vertex's total pending count is
/// stored.
pub fn pending_key(vertex_key: &str) -> String {
    format!("{vertex_key}/pending")
}

/// Builds the cache key under which a vertex's total effective buffer
/// length is stored.
pub fn length_key(vertex_key: &str) -> String {
    format!("{vertex_key}/length")
}

/// A bounded, thread-safe, LRU-evicted `String -> i64` map.
#[derive(Debug)]
pub struct MetricsCache {
    inner: Mutex<LruCache<String, i64>>,
}

impl MetricsCache {
    /// Creates a cache with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a cache with the given capacity (clamped to at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Overwrites `key` with `value`, touching its LRU recency.
    pub fn set(&self, key: impl Into<String>, value: i64) {
        let _ = self.inner.lock().put(key.into(), value);
    }

    /// Returns `(value, true)` if `key` is present, `(0, false)` otherwise.
    /// A present read counts as a touch for LRU purposes.
    pub fn get(&self, key: impl AsRef<str>) -> (i64, bool) {
        match self.inner.lock().get(key.as_ref()) {
            Some(value) => (*value, true),
            None => (0, false),
        }
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_key_reads_as_absent() {
        let cache = MetricsCache::new();
        assert_eq!(cache.get("ns/v/pending"), (0, false));
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = MetricsCache::new();
        cache.set(pending_key("ns/v"), 42);
        assert_eq!(cache.get(pending_key("ns/v")), (42, true));
    }

    #[test]
    fn set_overwrites_previous_value() {
        let cache = MetricsCache::new();
        cache.set("k", 1);
        cache.set("k", 2);
        assert_eq!(cache.get("k"), (2, true));
    }

    #[test]
    fn eviction_drops_least_recently_used_entry() {
        let cache = MetricsCache::with_capacity(2);
        cache.set("a", 1);
        cache.set("b", 2);
        // touch "a" so "b" becomes least-recently-used
        let _ = cache.get("a");
        cache.set("c", 3);

        assert_eq!(cache.get("b"), (0, false));
        assert_eq!(cache.get("a"), (1, true));
        assert_eq!(cache.get("c"), (3, true));
    }

    #[test]
    fn key_helpers_use_the_documented_suffixes() {
        assert_eq!(pending_key("ns/v"), "ns/v/pending");
        assert_eq!(length_key("ns/v"), "ns/v/length");
    }
}
