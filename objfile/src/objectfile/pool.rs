//! Shared pool of opened object files, one per mapping.

use std::path::PathBuf;
use std::sync::Arc;

use super::{Loader, ObjectFile};
use crate::cache::LoadingOnceCache;
use crate::domain::{ObjectFileError, Pid};

type PoolResult = Result<Arc<ObjectFile>, Arc<ObjectFileError>>;

/// Identity of a mapping in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub pid: Option<Pid>,
    pub path: PathBuf,
    pub start: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Opened object files keyed by mapping.
///
/// Concurrent requests for the same mapping open the file once; a failed
/// open is shared with those callers and retried on the next request.
/// Evicted handles are released when their last user drops them.
pub struct ObjectFilePool {
    cache: LoadingOnceCache<MappingKey, Arc<ObjectFile>, ObjectFileError>,
}

impl ObjectFilePool {
    /// Create a pool holding at most `capacity` handles (zero: unbounded).
    #[must_use]
    pub fn new(loader: Loader, capacity: usize) -> Self {
        let cache = LoadingOnceCache::new(capacity, move |key: &MappingKey| {
            let file = loader.open(&key.path, key.start, key.limit, key.offset)?;
            Ok::<_, ObjectFileError>(Arc::new(match key.pid {
                Some(pid) => file.with_pid(pid),
                None => file,
            }))
        });
        Self { cache }
    }

    /// The handle for `key`, opening it on first use.
    ///
    /// # Errors
    /// Returns the error of opening the file. Failed opens are retried on the
    /// next request.
    pub fn get(&self, key: &MappingKey) -> PoolResult {
        self.cache.get(key)
    }

    /// Remove the handle for `key` from the pool.
    pub fn evict(&self, key: &MappingKey) -> Option<Arc<ObjectFile>> {
        self.cache.invalidate(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for ObjectFilePool {
    fn default() -> Self {
        Self::new(Loader::default(), 0)
    }
}
