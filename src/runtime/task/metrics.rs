use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TaskRuntimeMetrics {
    spawned: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl TaskRuntimeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TaskMetricsSnapshot {
        let spawned = self.spawned.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        TaskMetricsSnapshot {
            tasks_spawned: spawned,
            tasks_completed: completed,
            tasks_waiting: spawned.saturating_sub(completed),
            tasks_panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskMetricsSnapshot {
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    /// Spawned but not yet finished, including tasks still queued.
    pub tasks_waiting: u64,
    /// Included in `tasks_completed`.
    pub tasks_panicked: u64,
}
