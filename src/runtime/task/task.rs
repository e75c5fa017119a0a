use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tracing::error;

use super::completion::{Cancelled, Completion, Promise, completion};

/// Unique identifier assigned to each task at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work queued on the scheduler. Dropping it unrun cancels its handle.
pub struct Task {
    id: TaskId,
    name: Option<String>,
    func: TaskFn,
    done: Promise<()>,
}

impl Task {
    pub fn new(name: Option<String>, func: TaskFn) -> (Self, JoinHandle) {
        let id = next_task_id();
        let (done, completion) = completion();
        let task = Self {
            id,
            name,
            func,
            done,
        };
        (task, JoinHandle { completion })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Run to completion. Returns `false` if the task panicked; the panic is
    /// contained so the worker survives.
    pub fn run(self) -> bool {
        let Self {
            id,
            name,
            func,
            done,
        } = self;
        match catch_unwind(AssertUnwindSafe(func)) {
            Ok(()) => {
                done.fulfil(());
                true
            }
            Err(_) => {
                error!(task = id.raw(), name = name.as_deref().unwrap_or("<anonymous>"), "task panicked");
                false
            }
        }
    }
}

/// Waits for a spawned task. Awaitable, or blocking through [`JoinHandle::join`].
#[derive(Debug)]
pub struct JoinHandle {
    completion: Completion<()>,
}

impl JoinHandle {
    /// `Err` if the task panicked or was dropped by a shut-down scheduler.
    pub fn join(self) -> Result<(), Cancelled> {
        self.completion.wait()
    }
}

impl Future for JoinHandle {
    type Output = Result<(), Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}
