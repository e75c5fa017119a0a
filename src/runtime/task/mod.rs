//! Worker pool and result delivery for asynchronous evaluations.

mod completion;
mod metrics;
mod scheduler;
mod task;

pub use completion::{Cancelled, Completion, Promise, completion};
pub use metrics::{TaskMetricsSnapshot, TaskRuntimeMetrics};
pub use scheduler::{SchedulerConfig, TaskScheduler};
pub use task::{JoinHandle, Task, TaskFn, TaskId};
