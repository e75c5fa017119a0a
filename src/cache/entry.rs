use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::FilterCache;
use crate::engine::FilterKey;

/// One compiled program and the key it was compiled from.
///
/// The program sits behind its own mutex: it may only be driven by one
/// evaluation at a time. The cache never drops an entry while a lease on it
/// is outstanding.
pub struct CacheEntry<P> {
    key: FilterKey,
    program: Mutex<P>,
}

impl<P> CacheEntry<P> {
    pub(crate) fn new(key: FilterKey, program: P) -> Self {
        Self {
            key,
            program: Mutex::new(program),
        }
    }

    pub fn key(&self) -> &FilterKey {
        &self.key
    }

    pub(crate) fn program(&self) -> &Mutex<P> {
        &self.program
    }
}

impl<P> fmt::Debug for CacheEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("busy", &self.program.is_locked())
            .finish_non_exhaustive()
    }
}

/// A counted reference to a cached entry. Dropping it releases the reference.
#[must_use = "dropping a lease releases the entry immediately"]
pub struct EntryLease<P: Send + 'static> {
    entry: Arc<CacheEntry<P>>,
    cache: FilterCache<P>,
}

impl<P: Send + 'static> EntryLease<P> {
    pub(crate) fn new(entry: Arc<CacheEntry<P>>, cache: FilterCache<P>) -> Self {
        Self { entry, cache }
    }
}

impl<P: Send + 'static> Deref for EntryLease<P> {
    type Target = CacheEntry<P>;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl<P: Send + 'static> Drop for EntryLease<P> {
    fn drop(&mut self) {
        self.cache.release_entry(&self.entry);
    }
}

impl<P: Send + 'static> fmt::Debug for EntryLease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryLease").field(&self.entry.key).finish()
    }
}
