use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use crossbeam_utils::Backoff;
use tracing::debug;

use super::metrics::{TaskMetricsSnapshot, TaskRuntimeMetrics};
use super::task::{JoinHandle, Task, TaskFn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(4, |n| n.get()),
            thread_name: "jqexec-worker".to_string(),
        }
    }
}

#[derive(Debug)]
struct SchedulerCore {
    injector: Injector<Task>,
    metrics: Arc<TaskRuntimeMetrics>,
    shutdown: AtomicBool,
    workers: usize,
}

/// Fixed pool of worker threads sharing a global injector queue, with
/// work stealing between the workers' local queues.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> io::Result<Self> {
        let worker_count = config.workers.max(1);
        let workers: Vec<Worker<Task>> = (0..worker_count).map(|_| Worker::new_fifo()).collect();
        let stealers: Arc<Vec<Stealer<Task>>> =
            Arc::new(workers.iter().map(Worker::stealer).collect());

        let core = Arc::new(SchedulerCore {
            injector: Injector::new(),
            metrics: TaskRuntimeMetrics::new(),
            shutdown: AtomicBool::new(false),
            workers: worker_count,
        });

        for (index, worker) in workers.into_iter().enumerate() {
            let worker_core = Arc::clone(&core);
            let stealers = Arc::clone(&stealers);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&worker_core, &stealers, &worker, index));
            if let Err(error) = spawned {
                core.shutdown.store(true, Ordering::SeqCst);
                return Err(error);
            }
        }

        debug!(workers = worker_count, "task scheduler started");
        Ok(Self { core })
    }

    pub fn workers(&self) -> usize {
        self.core.workers
    }

    pub fn metrics(&self) -> TaskMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn spawn_fn<F>(&self, name: Option<String>, func: F) -> JoinHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, join) = Task::new(name, Box::new(func) as TaskFn);
        if self.is_shutdown() {
            // Dropping the task resolves its handle as cancelled.
            debug!(task = task.id().raw(), "scheduler is shut down, dropping task");
            return join;
        }
        self.core.metrics.record_spawn();
        self.core.injector.push(task);
        join
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the workers. Running tasks finish; queued tasks are dropped,
    /// which cancels their handles.
    pub fn shutdown(&self) {
        if self
            .core
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!("task scheduler shutting down");
            loop {
                match self.core.injector.steal() {
                    Steal::Success(task) => {
                        debug!(task = task.id().raw(), "cancelled queued task");
                        drop(task);
                        self.core.metrics.record_completion();
                    }
                    Steal::Retry => {}
                    Steal::Empty => break,
                }
            }
        }
    }
}

fn run_task(core: &SchedulerCore, task: Task) {
    if !task.run() {
        core.metrics.record_panic();
    }
    core.metrics.record_completion();
}

fn worker_loop(
    core: &SchedulerCore,
    stealers: &[Stealer<Task>],
    local: &Worker<Task>,
    index: usize,
) {
    let backoff = Backoff::new();

    loop {
        if core.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Some(task) = local.pop() {
            backoff.reset();
            run_task(core, task);
            continue;
        }

        match core.injector.steal_batch_and_pop(local) {
            Steal::Success(task) => {
                backoff.reset();
                run_task(core, task);
                continue;
            }
            Steal::Retry => {
                backoff.spin();
                continue;
            }
            Steal::Empty => {}
        }

        let stolen = stealers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, stealer)| stealer.steal())
            .find_map(|steal| match steal {
                Steal::Success(task) => Some(task),
                Steal::Retry | Steal::Empty => None,
            });

        if let Some(task) = stolen {
            backoff.reset();
            run_task(core, task);
            continue;
        }

        // Nothing to do; yield slightly.
        if backoff.is_completed() {
            thread::sleep(Duration::from_micros(200));
        } else {
            backoff.snooze();
        }
    }

    // Tasks left in the local queue are dropped with it, cancelling them.
    while let Some(task) = local.pop() {
        drop(task);
        core.metrics.record_completion();
    }
    debug!(worker = index, "task worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler(workers: usize) -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig {
            workers,
            thread_name: "test-worker".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn runs_every_spawned_task() {
        let scheduler = scheduler(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let counter = Arc::clone(&counter);
                scheduler.spawn_fn(None, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert_eq!(scheduler.metrics().tasks_completed, 32);
        scheduler.shutdown();
    }

    #[test]
    fn spawn_after_shutdown_is_cancelled() {
        let scheduler = scheduler(1);
        scheduler.shutdown();
        let handle = scheduler.spawn_fn(Some("late".into()), || {});
        assert!(handle.join().is_err());
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let scheduler = scheduler(1);
        let failed = scheduler.spawn_fn(None, || panic!("boom"));
        assert!(failed.join().is_err());
        let ok = scheduler.spawn_fn(None, || {});
        assert!(ok.join().is_ok());
        assert_eq!(scheduler.metrics().tasks_panicked, 1);
        scheduler.shutdown();
    }
}
