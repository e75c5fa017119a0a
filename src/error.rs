//! Errors surfaced by the executor.

use std::time::Duration;

use thiserror::Error;

use crate::cache::CapacityError;
use crate::engine::{CompileError, ParseError, RunError};
use crate::runtime::task::Cancelled;

pub use crate::config::ConfigError;
pub use crate::template::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The filter did not compile. Nothing was cached.
    #[error("failed to compile filter: {message}")]
    Compile { message: String, diagnostic: String },
    #[error("invalid JSON input: {0}")]
    InvalidInput(#[from] ParseError),
    /// The filter raised an error. The compiled program stays cached.
    #[error("{0}")]
    Runtime(String),
    /// The evaluation ran past its deadline. The compiled program stays cached.
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    /// The worker pool shut down before the evaluation ran.
    #[error("evaluation was cancelled before it produced a result")]
    Cancelled,
}

impl ExecError {
    pub(crate) fn from_run(error: RunError, budget: Option<Duration>) -> Self {
        match error {
            RunError::Runtime(message) => ExecError::Runtime(message),
            RunError::Timeout => ExecError::Timeout(budget.unwrap_or_default()),
        }
    }

    /// Category name, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Compile { .. } => "CompileError",
            ExecError::InvalidInput(_) => "ParseError",
            ExecError::Runtime(_) => "RuntimeError",
            ExecError::Timeout(_) => "TimeoutError",
            ExecError::Capacity(_) => "CapacityError",
            ExecError::Cancelled => "CancelledError",
        }
    }

    /// The rendered compiler diagnostic, for compile errors.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ExecError::Compile { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

impl From<CompileError> for ExecError {
    fn from(error: CompileError) -> Self {
        ExecError::Compile {
            message: error.message,
            diagnostic: error.diagnostic,
        }
    }
}

impl From<Cancelled> for ExecError {
    fn from(_: Cancelled) -> Self {
        ExecError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_budget() {
        let error = ExecError::from_run(RunError::Timeout, Some(Duration::from_secs(1)));
        assert_eq!(error, ExecError::Timeout(Duration::from_secs(1)));
        assert_eq!(error.kind(), "TimeoutError");
        assert_eq!(error.to_string(), "evaluation timed out after 1s");
    }

    #[test]
    fn only_compile_errors_carry_diagnostics() {
        let error = ExecError::from(CompileError::new("bad"));
        assert_eq!(error.diagnostic(), Some("bad"));
        assert_eq!(ExecError::Runtime("x".into()).diagnostic(), None);
    }
}
