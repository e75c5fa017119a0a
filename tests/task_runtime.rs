use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jqexec::runtime::task::{SchedulerConfig, TaskScheduler, completion};

fn scheduler(workers: usize) -> TaskScheduler {
    TaskScheduler::new(SchedulerConfig {
        workers,
        ..SchedulerConfig::default()
    })
    .expect("failed to start scheduler")
}

#[test]
fn task_spawn_and_join() {
    let scheduler = scheduler(2);
    let handle = scheduler.spawn_fn(Some("test".into()), || {});
    assert!(handle.join().is_ok());
    scheduler.shutdown();
}

#[test]
fn completion_delivers_value_across_threads() {
    let scheduler = scheduler(2);
    let (promise, completion) = completion::<i64>();
    let _join = scheduler.spawn_fn(None, move || promise.fulfil(42));
    assert_eq!(completion.wait(), Ok(42));
    scheduler.shutdown();
}

#[test]
fn dropped_promise_resolves_as_cancelled() {
    let (promise, completion) = completion::<i64>();
    drop(promise);
    assert!(completion.wait().is_err());
}

#[test]
fn many_tasks_all_run() {
    let scheduler = scheduler(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..200)
        .map(|_| {
            let counter = Arc::clone(&counter);
            scheduler.spawn_fn(None, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("task was cancelled");
    }

    assert_eq!(counter.load(Ordering::SeqCst), 200);
    let metrics = scheduler.metrics();
    assert_eq!(metrics.tasks_spawned, 200);
    scheduler.shutdown();
}

#[test]
fn panicking_task_is_contained() {
    let scheduler = scheduler(1);
    let handle = scheduler.spawn_fn(None, || panic!("task failure"));
    assert!(handle.join().is_err(), "a panicked task never fulfils its handle");

    let after = scheduler.spawn_fn(None, || {});
    assert!(after.join().is_ok(), "worker keeps running after a panic");
    assert_eq!(scheduler.metrics().tasks_panicked, 1);
    scheduler.shutdown();
}

#[test]
fn spawn_after_shutdown_is_cancelled() {
    let scheduler = scheduler(1);
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());

    let (promise, completion) = completion::<()>();
    let _join = scheduler.spawn_fn(None, move || promise.fulfil(()));
    assert!(completion.wait().is_err());
}

#[tokio::test]
async fn completion_can_be_awaited() {
    let scheduler = scheduler(2);
    let (promise, completion) = completion::<String>();
    let _join = scheduler.spawn_fn(None, move || {
        std::thread::sleep(Duration::from_millis(10));
        promise.fulfil("done".to_string());
    });
    assert_eq!(completion.await.as_deref(), Ok("done"));
    scheduler.shutdown();
}
