use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::recency::RecencyList;
use super::{CacheEntry, CacheMetadata, EntryLease, SweepPolicy};
use crate::engine::FilterKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("cache capacity must be positive")]
    NonPositive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    /// Entries with at least one outstanding lease.
    pub busy: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    /// Total time spent compiling the programs that were inserted.
    pub compile_time: Duration,
}

struct Slot<P> {
    entry: Arc<CacheEntry<P>>,
    refs: usize,
    metadata: CacheMetadata,
}

struct CacheState<P> {
    capacity: usize,
    index: AHashMap<FilterKey, usize>,
    recency: RecencyList<Slot<P>>,
    stats: CacheStats,
}

struct Shared<P> {
    state: Mutex<CacheState<P>>,
    policy: SweepPolicy,
}

/// LRU cache of compiled programs, shared by every clone of the handle.
///
/// All bookkeeping (key map, recency order, reference counts) happens under
/// one cache-wide lock that is never held while a program runs. Entries with
/// outstanding leases are never evicted, so capacity is a soft bound.
pub struct FilterCache<P: Send + 'static> {
    shared: Arc<Shared<P>>,
}

impl<P: Send + 'static> Clone for FilterCache<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Send + 'static> fmt::Debug for FilterCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCache")
            .field("policy", &self.shared.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<P: Send + 'static> FilterCache<P> {
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        Self::with_policy(capacity, SweepPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: SweepPolicy) -> Result<Self, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError::NonPositive);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    capacity,
                    index: AHashMap::new(),
                    recency: RecencyList::new(),
                    stats: CacheStats {
                        capacity,
                        ..CacheStats::default()
                    },
                }),
                policy,
            }),
        })
    }

    pub fn policy(&self) -> SweepPolicy {
        self.shared.policy
    }

    /// Look up `key`; on a hit the entry becomes most recent and gains a reference.
    pub fn acquire(&self, key: &FilterKey) -> Option<EntryLease<P>> {
        let mut state = self.shared.state.lock();
        let Some(&index) = state.index.get(key) else {
            state.stats.misses += 1;
            debug!(filter = %key, "cache miss");
            return None;
        };

        state.recency.move_to_front(index);
        let slot = state.recency.get_mut(index)?;
        slot.refs += 1;
        slot.metadata.record_access();
        let entry = Arc::clone(&slot.entry);
        state.stats.hits += 1;
        drop(state);

        debug!(filter = %key, "cache hit");
        Some(EntryLease::new(entry, self.clone()))
    }

    /// Publish a freshly compiled program and return a lease on it.
    ///
    /// If another caller inserted the same key first, `program` is dropped
    /// unpublished and the existing entry is leased instead.
    pub fn insert(&self, key: FilterKey, program: P, compile_time: Duration) -> EntryLease<P> {
        let (lease, loser, evicted) = {
            let mut state = self.shared.state.lock();

            if let Some(&index) = state.index.get(&key) {
                state.recency.move_to_front(index);
                let existing = state.recency.get_mut(index).map(|slot| {
                    slot.refs += 1;
                    slot.metadata.record_access();
                    Arc::clone(&slot.entry)
                });
                match existing {
                    Some(entry) => (EntryLease::new(entry, self.clone()), Some(program), Vec::new()),
                    // The key map and recency list disagree; rebuild the slot.
                    None => {
                        state.index.remove(&key);
                        let entry = Self::publish(&mut state, key, program, compile_time);
                        let evicted = self.sweep(&mut state);
                        (EntryLease::new(entry, self.clone()), None, evicted)
                    }
                }
            } else {
                let entry = Self::publish(&mut state, key, program, compile_time);
                let evicted = self.sweep(&mut state);
                (EntryLease::new(entry, self.clone()), None, evicted)
            }
        };

        if loser.is_some() {
            debug!(filter = %lease.key(), "lost compile race, discarding duplicate program");
        }
        drop(loser);
        Self::teardown(evicted);
        lease
    }

    fn publish(
        state: &mut CacheState<P>,
        key: FilterKey,
        program: P,
        compile_time: Duration,
    ) -> Arc<CacheEntry<P>> {
        let entry = Arc::new(CacheEntry::new(key.clone(), program));
        let index = state.recency.push_front(Slot {
            entry: Arc::clone(&entry),
            refs: 1,
            metadata: CacheMetadata::new(compile_time),
        });
        state.index.insert(key, index);
        state.stats.inserts += 1;
        state.stats.compile_time += compile_time;
        entry
    }

    /// Give back a reference taken by `acquire` or `insert`.
    pub fn release(&self, lease: EntryLease<P>) {
        drop(lease);
    }

    pub(crate) fn release_entry(&self, entry: &Arc<CacheEntry<P>>) {
        let mut state = self.shared.state.lock();
        let Some(&index) = state.index.get(entry.key()) else {
            debug_assert!(false, "released entry {} is not cached", entry.key());
            return;
        };
        if let Some(slot) = state.recency.get_mut(index) {
            if Arc::ptr_eq(&slot.entry, entry) {
                slot.refs = slot.refs.saturating_sub(1);
            }
        }
    }

    /// Evict idle entries from the tail while over capacity. Returns how many left.
    pub fn evict(&self) -> usize {
        let evicted = {
            let mut state = self.shared.state.lock();
            self.sweep(&mut state)
        };
        let count = evicted.len();
        Self::teardown(evicted);
        count
    }

    fn sweep(&self, state: &mut CacheState<P>) -> Vec<Arc<CacheEntry<P>>> {
        let mut evicted = Vec::new();
        let mut cursor = state.recency.back();

        while state.recency.len() > state.capacity {
            let Some(index) = cursor else {
                break;
            };
            let previous = state.recency.prev(index);
            let busy = state.recency.get(index).is_some_and(|slot| slot.refs > 0);

            if busy {
                match self.shared.policy {
                    SweepPolicy::StopAtBusy => {
                        warn!(
                            entries = state.recency.len(),
                            capacity = state.capacity,
                            "cache over capacity, least recently used entry is busy"
                        );
                        break;
                    }
                    SweepPolicy::SkipBusy => {
                        cursor = previous;
                        continue;
                    }
                }
            }

            if let Some(slot) = state.recency.remove(index) {
                state.index.remove(slot.entry.key());
                state.stats.evictions += 1;
                debug!(filter = %slot.entry.key(), uses = slot.metadata.access_count, "evicting");
                evicted.push(slot.entry);
            }
            cursor = previous;
        }

        if state.recency.len() > state.capacity && self.shared.policy == SweepPolicy::SkipBusy {
            warn!(
                entries = state.recency.len(),
                capacity = state.capacity,
                "cache over capacity, every remaining entry is busy"
            );
        }
        evicted
    }

    /// Programs are dropped here, after leaving the cache and outside its lock.
    fn teardown(evicted: Vec<Arc<CacheEntry<P>>>) {
        drop(evicted);
    }

    /// Change the capacity and sweep. Returns the new capacity.
    pub fn resize(&self, capacity: usize) -> Result<usize, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError::NonPositive);
        }
        let (previous, evicted) = {
            let mut state = self.shared.state.lock();
            let previous = state.capacity;
            state.capacity = capacity;
            state.stats.capacity = capacity;
            (previous, self.sweep(&mut state))
        };
        info!(from = previous, to = capacity, evicted = evicted.len(), "resized filter cache");
        Self::teardown(evicted);
        Ok(capacity)
    }

    /// Drop every idle entry. Busy entries stay. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let evicted = {
            let mut state = self.shared.state.lock();
            let idle: Vec<usize> = state
                .recency
                .iter()
                .filter(|(_, slot)| slot.refs == 0)
                .map(|(index, _)| index)
                .collect();
            let mut evicted = Vec::with_capacity(idle.len());
            for index in idle {
                if let Some(slot) = state.recency.remove(index) {
                    state.index.remove(slot.entry.key());
                    evicted.push(slot.entry);
                }
            }
            evicted
        };
        let count = evicted.len();
        Self::teardown(evicted);
        count
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &FilterKey) -> bool {
        self.shared.state.lock().index.contains_key(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<FilterKey> {
        let state = self.shared.state.lock();
        state
            .recency
            .iter()
            .map(|(_, slot)| slot.entry.key().clone())
            .collect()
    }

    /// Outstanding leases on `key`, if it is cached.
    pub fn ref_count(&self, key: &FilterKey) -> Option<usize> {
        let state = self.shared.state.lock();
        let index = *state.index.get(key)?;
        state.recency.get(index).map(|slot| slot.refs)
    }

    pub fn metadata(&self, key: &FilterKey) -> Option<CacheMetadata> {
        let state = self.shared.state.lock();
        let index = *state.index.get(key)?;
        state.recency.get(index).map(|slot| slot.metadata)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            entries: state.recency.len(),
            busy: state.recency.iter().filter(|(_, slot)| slot.refs > 0).count(),
            ..state.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: &str) -> FilterKey {
        FilterKey::new(source)
    }

    fn assert_consistent<P: Send + 'static>(cache: &FilterCache<P>) {
        let state = cache.shared.state.lock();
        assert_eq!(state.index.len(), state.recency.len());
        for (index, slot) in state.recency.iter() {
            assert_eq!(state.index.get(slot.entry.key()), Some(&index));
        }
    }

    #[test]
    fn map_and_recency_agree_through_mixed_operations() {
        let cache: FilterCache<u32> = FilterCache::new(3).unwrap();
        let mut held = Vec::new();
        for round in 0..40u32 {
            let name = format!(".k{}", round % 7);
            match cache.acquire(&key(&name)) {
                Some(lease) if round % 3 == 0 => held.push(lease),
                Some(lease) => drop(lease),
                None => drop(cache.insert(key(&name), round, Duration::ZERO)),
            }
            if round % 5 == 0 {
                held.clear();
                cache.evict();
            }
            assert_consistent(&cache);
        }
        drop(held);
        cache.evict();
        assert_consistent(&cache);
        assert!(cache.len() <= 3);
    }

    #[test]
    fn lease_drop_releases_reference() {
        let cache: FilterCache<u32> = FilterCache::new(2).unwrap();
        let lease = cache.insert(key(".a"), 1, Duration::ZERO);
        assert_eq!(cache.ref_count(&key(".a")), Some(1));
        let second = cache.acquire(&key(".a")).unwrap();
        assert_eq!(cache.ref_count(&key(".a")), Some(2));
        cache.release(second);
        drop(lease);
        assert_eq!(cache.ref_count(&key(".a")), Some(0));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            FilterCache::<u32>::new(0).unwrap_err(),
            CapacityError::NonPositive
        );
        let cache: FilterCache<u32> = FilterCache::new(1).unwrap();
        assert!(cache.resize(0).is_err());
        assert_eq!(cache.capacity(), 1);
    }
}
