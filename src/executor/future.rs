use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use super::Evaluation;
use crate::error::ExecError;
use crate::runtime::task::Completion;

/// Result of an evaluation running on the worker pool.
///
/// Await it from async code, or block on it with [`EvalFuture::wait`].
#[derive(Debug)]
#[must_use = "the evaluation result is only observable through the future"]
pub struct EvalFuture {
    completion: Completion<Result<Evaluation, ExecError>>,
}

impl EvalFuture {
    pub(crate) fn new(completion: Completion<Result<Evaluation, ExecError>>) -> Self {
        Self { completion }
    }

    pub fn is_ready(&self) -> bool {
        self.completion.is_ready()
    }

    pub fn wait(self) -> Result<Evaluation, ExecError> {
        self.completion.wait()?
    }

    /// Wait at most `timeout`; hands the future back if it is still pending.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<Evaluation, ExecError>, Self> {
        match self.completion.wait_timeout(timeout) {
            Ok(outcome) => Ok(outcome.map_err(ExecError::from).and_then(|result| result)),
            Err(completion) => Err(Self { completion }),
        }
    }
}

impl Future for EvalFuture {
    type Output = Result<Evaluation, ExecError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion)
            .poll(cx)
            .map(|outcome| outcome.map_err(ExecError::from).and_then(|result| result))
    }
}
