use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::MutexGuard;
use tracing::{debug, trace};

use crate::cache::EntryLease;
use crate::engine::FilterKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub acquisitions: u64,
    /// Acquisitions that had to wait for another evaluation of the same entry.
    pub contended: u64,
}

/// Serialises evaluations per cache entry.
///
/// A guard can only be taken through a lease, and borrows it, so the entry's
/// reference count stays positive for as long as the program is driven.
#[derive(Debug, Default)]
pub struct ExecutionCoordinator {
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until this thread has exclusive use of the entry's program.
    pub fn lock<'e, P: Send + 'static>(&self, lease: &'e EntryLease<P>) -> ExecutionGuard<'e, P> {
        let program = lease.program();
        let guard = if let Some(guard) = program.try_lock() {
            guard
        } else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            let waiting = Instant::now();
            let guard = program.lock();
            debug!(filter = %lease.key(), waited = ?waiting.elapsed(), "entry was busy");
            guard
        };
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        ExecutionGuard {
            program: guard,
            key: lease.key(),
            locked_at: Instant::now(),
        }
    }

    /// Exclusive use without waiting, if the entry is idle.
    pub fn try_lock<'e, P: Send + 'static>(
        &self,
        lease: &'e EntryLease<P>,
    ) -> Option<ExecutionGuard<'e, P>> {
        let program = lease.program().try_lock()?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(ExecutionGuard {
            program,
            key: lease.key(),
            locked_at: Instant::now(),
        })
    }

    pub fn unlock<P>(&self, guard: ExecutionGuard<'_, P>) {
        drop(guard);
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive access to one compiled program. Dropping it unlocks the entry.
pub struct ExecutionGuard<'e, P> {
    program: MutexGuard<'e, P>,
    key: &'e FilterKey,
    locked_at: Instant,
}

impl<P> ExecutionGuard<'_, P> {
    pub fn key(&self) -> &FilterKey {
        self.key
    }
}

impl<P> Deref for ExecutionGuard<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.program
    }
}

impl<P> DerefMut for ExecutionGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.program
    }
}

impl<P> Drop for ExecutionGuard<'_, P> {
    fn drop(&mut self) {
        trace!(filter = %self.key, held = ?self.locked_at.elapsed(), "entry unlocked");
    }
}

impl<P> fmt::Debug for ExecutionGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("key", self.key)
            .finish_non_exhaustive()
    }
}
