//! Cached, concurrent evaluation of jq-style filters over JSON.
//!
//! Compiled filters live in a bounded LRU cache shared by every thread of an
//! [`Executor`]. Evaluations of the same filter are serialised; different
//! filters run in parallel on the calling thread or on a work-stealing pool.

pub mod ast;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod template;
pub mod version;

pub use cache::{CacheStats, FilterCache, SweepPolicy};
pub use config::{ConfigError, ExecutorConfig};
pub use engine::{CompileError, Deadline, FilterEngine, FilterKey, JqEngine, ParseError, RunError};
pub use error::ExecError;
pub use executor::{
    EvalFuture, EvalOptions, Evaluation, ExecOptions, Executor, default_executor, normalize_quotes,
};
pub use template::{TemplateError, render, render_recursively, render_recursively_async};
