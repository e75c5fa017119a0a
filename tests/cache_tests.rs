use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use jqexec::cache::{CapacityError, FilterCache, SweepPolicy};
use jqexec::engine::FilterKey;

/// Program stand-in that counts how often it is dropped.
struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracked_cache(capacity: usize, policy: SweepPolicy) -> Result<(FilterCache<Tracked>, Arc<AtomicUsize>)> {
    let drops = Arc::new(AtomicUsize::new(0));
    Ok((FilterCache::with_policy(capacity, policy)?, drops))
}

fn add(cache: &FilterCache<Tracked>, drops: &Arc<AtomicUsize>, filter: &str) {
    let lease = cache.insert(
        FilterKey::new(filter),
        Tracked(Arc::clone(drops)),
        Duration::from_micros(10),
    );
    cache.release(lease);
}

fn sources(cache: &FilterCache<Tracked>) -> Vec<String> {
    cache.keys().iter().map(|key| key.source().to_string()).collect()
}

#[test]
fn least_recently_used_entry_is_evicted() -> Result<()> {
    let (cache, drops) = tracked_cache(2, SweepPolicy::StopAtBusy)?;
    add(&cache, &drops, ".a");
    add(&cache, &drops, ".b");
    let lease = cache.acquire(&FilterKey::new(".a")).expect(".a should be cached");
    cache.release(lease);
    add(&cache, &drops, ".c");

    assert_eq!(sources(&cache), vec![".c", ".a"]);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().evictions, 1);
    Ok(())
}

#[test]
fn busy_entry_stops_the_sweep_until_released() -> Result<()> {
    let (cache, drops) = tracked_cache(1, SweepPolicy::StopAtBusy)?;
    add(&cache, &drops, ".a");
    let held = cache.acquire(&FilterKey::new(".a")).expect(".a should be cached");

    add(&cache, &drops, ".b");
    assert_eq!(cache.len(), 2, "busy tail entry must not be evicted");
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(cache.ref_count(&FilterKey::new(".a")), Some(1));

    cache.release(held);
    assert_eq!(cache.evict(), 1);
    assert_eq!(sources(&cache), vec![".b"]);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn skip_busy_evicts_idle_entries_past_a_busy_tail() -> Result<()> {
    let (cache, drops) = tracked_cache(1, SweepPolicy::SkipBusy)?;
    add(&cache, &drops, ".a");
    let held = cache.acquire(&FilterKey::new(".a")).expect(".a should be cached");

    add(&cache, &drops, ".b");
    assert_eq!(cache.evict(), 1);
    assert_eq!(sources(&cache), vec![".a"]);

    cache.release(held);
    assert_eq!(cache.ref_count(&FilterKey::new(".a")), Some(0));
    Ok(())
}

#[test]
fn shrinking_evicts_down_to_the_new_capacity() -> Result<()> {
    let (cache, drops) = tracked_cache(3, SweepPolicy::StopAtBusy)?;
    for filter in [".a", ".b", ".c"] {
        add(&cache, &drops, filter);
    }

    assert_eq!(cache.resize(1)?, 1);
    assert_eq!(sources(&cache), vec![".c"]);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().capacity, 1);

    assert_eq!(cache.resize(0), Err(CapacityError::NonPositive));
    assert_eq!(cache.capacity(), 1);
    Ok(())
}

#[test]
fn every_program_is_dropped_exactly_once() -> Result<()> {
    let (cache, drops) = tracked_cache(1, SweepPolicy::StopAtBusy)?;
    for filter in [".a", ".b", ".c"] {
        add(&cache, &drops, filter);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 2);

    drop(cache);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn duplicate_insert_keeps_the_first_program() -> Result<()> {
    let (cache, drops) = tracked_cache(4, SweepPolicy::StopAtBusy)?;
    let key = FilterKey::new(".a");
    let first = cache.insert(key.clone(), Tracked(Arc::clone(&drops)), Duration::ZERO);
    let second = cache.insert(key.clone(), Tracked(Arc::clone(&drops)), Duration::ZERO);

    assert_eq!(drops.load(Ordering::SeqCst), 1, "the losing program is dropped");
    assert_eq!(cache.ref_count(&key), Some(2));
    assert_eq!(cache.len(), 1);

    cache.release(first);
    cache.release(second);
    assert_eq!(cache.ref_count(&key), Some(0));
    Ok(())
}

#[test]
fn clear_keeps_busy_entries() -> Result<()> {
    let (cache, drops) = tracked_cache(4, SweepPolicy::StopAtBusy)?;
    add(&cache, &drops, ".a");
    add(&cache, &drops, ".b");
    let held = cache.acquire(&FilterKey::new(".b")).expect(".b should be cached");

    assert_eq!(cache.clear(), 1);
    assert_eq!(sources(&cache), vec![".b"]);
    drop(held);
    assert_eq!(cache.ref_count(&FilterKey::new(".b")), Some(0));
    Ok(())
}

#[test]
fn stats_count_hits_and_misses() -> Result<()> {
    let (cache, drops) = tracked_cache(4, SweepPolicy::StopAtBusy)?;
    let key = FilterKey::new(".a");
    assert!(cache.acquire(&key).is_none());
    add(&cache, &drops, ".a");
    for _ in 0..3 {
        let lease = cache.acquire(&key).expect(".a should be cached");
        cache.release(lease);
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.busy, 0);
    let metadata = cache.metadata(&key).expect("metadata for cached key");
    assert_eq!(metadata.access_count, 4);
    Ok(())
}

#[test]
fn env_flag_separates_cache_entries() -> Result<()> {
    let (cache, drops) = tracked_cache(4, SweepPolicy::StopAtBusy)?;
    add(&cache, &drops, "$ENV.HOME");
    assert!(!cache.contains(&FilterKey::new("$ENV.HOME").with_env(true)));
    assert!(cache.contains(&FilterKey::new("$ENV.HOME")));
    Ok(())
}
