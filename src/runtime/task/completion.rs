//! Single-assignment result slot shared by a producer and one consumer.
//!
//! The producer holds a [`Promise`]; the consumer holds a [`Completion`],
//! which can be awaited or waited on from a plain thread. Dropping a promise
//! without fulfilling it resolves the slot as cancelled, so the consumer is
//! always woken exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the task was dropped before it produced a result")]
pub struct Cancelled;

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(T),
    Cancelled,
    Taken,
}

#[derive(Debug)]
struct Inner<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
}

#[derive(Debug)]
struct Shared<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
}

impl<T> Shared<T> {
    fn resolve(&self, outcome: Slot<T>) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Pending) {
            return false;
        }
        inner.slot = outcome;
        let waker = inner.waker.take();
        drop(inner);

        self.condvar.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

fn take<T>(slot: &mut Slot<T>) -> Option<Result<T, Cancelled>> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Pending => {
            *slot = Slot::Pending;
            None
        }
        Slot::Ready(value) => Some(Ok(value)),
        Slot::Cancelled | Slot::Taken => Some(Err(Cancelled)),
    }
}

/// Create a connected promise/completion pair.
pub fn completion<T>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            slot: Slot::Pending,
            waker: None,
        }),
        condvar: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Completion { shared },
    )
}

/// Producer side.
#[derive(Debug)]
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn fulfil(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Slot::Ready(value));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Slot::Cancelled);
        }
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    pub fn is_ready(&self) -> bool {
        !matches!(self.shared.inner.lock().slot, Slot::Pending)
    }

    /// Block the current thread until the promise resolves.
    pub fn wait(self) -> Result<T, Cancelled> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = take(&mut inner.slot) {
                return outcome;
            }
            self.shared.condvar.wait(&mut inner);
        }
    }

    /// Like [`Completion::wait`], giving up after `timeout`. On timeout the
    /// completion is handed back so the caller can keep waiting.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, Cancelled>, Self> {
        {
            let mut inner = self.shared.inner.lock();
            if let Some(outcome) = take(&mut inner.slot) {
                return Ok(outcome);
            }
            let _ = self.shared.condvar.wait_for(&mut inner, timeout);
            if let Some(outcome) = take(&mut inner.slot) {
                return Ok(outcome);
            }
        }
        Err(self)
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        if let Some(outcome) = take(&mut inner.slot) {
            return Poll::Ready(outcome);
        }
        match &inner.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => inner.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilled_value_is_delivered_once() {
        let (promise, completion) = completion();
        promise.fulfil(7);
        assert_eq!(completion.wait(), Ok(7));
    }

    #[test]
    fn dropped_promise_cancels() {
        let (promise, completion) = completion::<u8>();
        drop(promise);
        assert!(completion.is_ready());
        assert_eq!(completion.wait(), Err(Cancelled));
    }

    #[test]
    fn wait_timeout_returns_the_completion() {
        let (promise, completion) = completion::<u8>();
        let completion = completion
            .wait_timeout(Duration::from_millis(10))
            .unwrap_err();
        promise.fulfil(1);
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)).ok(), Some(Ok(1)));
    }

    #[test]
    fn wakes_a_waiting_thread() {
        let (promise, completion) = completion();
        let waiter = std::thread::spawn(move || completion.wait());
        std::thread::sleep(Duration::from_millis(20));
        promise.fulfil("done");
        assert_eq!(waiter.join().unwrap(), Ok("done"));
    }
}
