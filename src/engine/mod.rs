//! The compile/run seam between the cache and a filter language.
//!
//! The executor only ever talks to a [`FilterEngine`]; [`JqEngine`] is the
//! default implementation, but tests plug in engines that count compilations
//! and program teardowns.

pub mod jq;
mod resolve;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

pub use jq::{CompiledFilter, JqEngine};

/// Identity of a compiled program: the verbatim filter text plus whether the
/// program may read the process environment. No normalisation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    source: Arc<str>,
    env: bool,
}

impl FilterKey {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            env: false,
        }
    }

    #[must_use]
    pub fn with_env(mut self, enabled: bool) -> Self {
        self.env = enabled;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn env_enabled(&self) -> bool {
        self.env
    }
}

impl From<&str> for FilterKey {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for FilterKey {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)?;
        if self.env {
            f.write_str(" [env]")?;
        }
        Ok(())
    }
}

/// Point in time after which a running program must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    /// First problem found, on one line.
    pub message: String,
    /// Every problem, rendered against the filter source.
    pub diagnostic: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            diagnostic: message.clone(),
            message,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} at line {line} column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        let line = error.line();
        let column = error.column();
        let message = error.to_string();
        // serde_json appends its own position; keep only the description.
        let message = message
            .rsplit_once(" at line ")
            .map_or(message.as_str(), |(head, _)| head)
            .to_string();
        Self {
            message,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("{0}")]
    Runtime(String),
    #[error("evaluation timed out")]
    Timeout,
}

/// Lazily produced results of one run. Borrowing the program for `'p` is what
/// keeps it inside its execution lock while outputs are pulled.
pub type Outputs<'p> = Box<dyn Iterator<Item = Result<Value, RunError>> + 'p>;

pub trait FilterEngine: Send + Sync + 'static {
    /// Compiled form of a filter. Dropping it releases its resources.
    type Program: Send + 'static;

    fn compile(&self, key: &FilterKey) -> Result<Self::Program, CompileError>;

    fn run<'p>(
        &self,
        program: &'p mut Self::Program,
        input: Value,
        deadline: Option<Deadline>,
    ) -> Outputs<'p>;

    fn parse(&self, json: &str) -> Result<Value, ParseError> {
        serde_json::from_str(json).map_err(ParseError::from)
    }

    fn serialize(&self, value: &Value) -> String {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_is_part_of_identity() {
        let plain = FilterKey::new(".a");
        let with_env = FilterKey::new(".a").with_env(true);
        assert_ne!(plain, with_env);
        assert_eq!(plain, FilterKey::from(".a"));
        assert_eq!(with_env.to_string(), ".a [env]");
    }

    #[test]
    fn parse_error_keeps_position() {
        let engine = JqEngine::new();
        let error = engine.parse("{\"a\": }").unwrap_err();
        assert_eq!(error.line, 1);
        assert!(!error.message.contains(" at line "));
    }

    #[test]
    fn deadline_in_the_past_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
