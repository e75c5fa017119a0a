//! In-memory LRU cache of compiled filter programs.

pub mod entry;
pub mod eviction;
pub mod filter_cache;
pub mod metadata;
mod recency;

pub use entry::{CacheEntry, EntryLease};
pub use eviction::SweepPolicy;
pub use filter_cache::{CacheStats, CapacityError, FilterCache};
pub use metadata::CacheMetadata;
