//! Loading cache that coalesces concurrent loads of the same key.
//!
//! Backed by [`moka::sync::Cache`]. On a miss the loader runs at most once
//! per key at a time: callers that arrive while a load is in flight wait for
//! it and share its result. Loaded values are kept, bounded by capacity with
//! moka's size-based eviction. Errors are handed to every caller of that load
//! but never stored, so a later request tries again.

use std::hash::Hash;
use std::sync::Arc;

use moka::sync::Cache;

type Loader<K, V, E> = Box<dyn Fn(&K) -> Result<V, E> + Send + Sync>;

pub struct LoadingOnceCache<K, V, E> {
    loader: Loader<K, V, E>,
    cache: Cache<K, V>,
}

impl<K, V, E> LoadingOnceCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` values. A capacity of zero
    /// means unbounded.
    pub fn new<F>(capacity: usize, loader: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        let mut builder = Cache::builder();
        if capacity > 0 {
            builder = builder.max_capacity(u64::try_from(capacity).unwrap_or(u64::MAX));
        }
        Self { loader: Box::new(loader), cache: builder.build() }
    }

    /// Get the value for `key`, loading it on a miss.
    ///
    /// # Errors
    /// Returns the loader's error for the flight this call joined.
    pub fn get(&self, key: &K) -> Result<V, Arc<E>> {
        self.cache.try_get_with(key.clone(), || (self.loader)(key))
    }

    /// Cached value for `key`, without loading.
    #[must_use]
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Drop the cached value for `key`, returning it.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.cache.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        // Entry counts are only updated by pending maintenance.
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
