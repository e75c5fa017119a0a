//! The public evaluation surface: resolve a cached program, lock it, run it,
//! and hand back the first output.

pub mod coordinator;
mod future;
mod quotes;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheMetadata, CacheStats, CapacityError, EntryLease, FilterCache};
use crate::config::{ConfigError, ExecutorConfig};
use crate::engine::{Deadline, FilterEngine, FilterKey, JqEngine};
use crate::error::ExecError;
use crate::runtime::task::{SchedulerConfig, TaskMetricsSnapshot, TaskScheduler, completion};

pub use coordinator::{CoordinatorStats, ExecutionCoordinator, ExecutionGuard};
pub use future::EvalFuture;
pub use quotes::normalize_quotes;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalOptions {
    /// Overrides the configured default timeout.
    pub timeout: Option<Duration>,
    /// Let the filter read the process environment through `$ENV` and `env`.
    pub enable_env: bool,
}

impl EvalOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Options for the lenient [`Executor::exec`] helpers.
pub type ExecOptions = EvalOptions;

/// First output of a filter; `None` when it produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: Option<Value>,
}

impl Evaluation {
    pub fn into_value(self) -> Value {
        self.value.unwrap_or(Value::Null)
    }
}

struct Core<E: FilterEngine> {
    engine: E,
    cache: FilterCache<E::Program>,
    coordinator: ExecutionCoordinator,
    config: ExecutorConfig,
}

impl<E: FilterEngine> Core<E> {
    fn lease(&self, key: &FilterKey) -> Result<EntryLease<E::Program>, ExecError> {
        if let Some(lease) = self.cache.acquire(key) {
            return Ok(lease);
        }
        let started = Instant::now();
        // A failed compile leaves the cache untouched.
        let program = self.engine.compile(key)?;
        Ok(self.cache.insert(key.clone(), program, started.elapsed()))
    }

    fn evaluate(
        &self,
        json: &str,
        key: &FilterKey,
        timeout: Option<Duration>,
    ) -> Result<Evaluation, ExecError> {
        let lease = self.lease(key)?;
        let mut guard = self.coordinator.lock(&lease);
        let input = self.engine.parse(json)?;

        let deadline = timeout.map(Deadline::after);
        let first = self.engine.run(&mut *guard, input, deadline).next();

        self.coordinator.unlock(guard);
        self.cache.release(lease);

        match first {
            None => Ok(Evaluation { value: None }),
            Some(Ok(value)) => Ok(Evaluation { value: Some(value) }),
            Some(Err(error)) => {
                let error = ExecError::from_run(error, timeout);
                if let ExecError::Timeout(after) = &error {
                    warn!(filter = %key, ?after, "evaluation timed out");
                }
                Err(error)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

struct Inner<E: FilterEngine> {
    core: Arc<Core<E>>,
    scheduler: TaskScheduler,
}

impl<E: FilterEngine> Drop for Inner<E> {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Cached, concurrent filter evaluation. Cloning is cheap; clones share the
/// cache and the worker pool, which shuts down with the last clone.
pub struct Executor<E: FilterEngine = JqEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: FilterEngine> Clone for Executor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: FilterEngine> fmt::Debug for Executor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.inner.core.config)
            .field("cache", &self.inner.core.cache)
            .finish_non_exhaustive()
    }
}

impl Executor<JqEngine> {
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        Self::with_engine(JqEngine::new(), config)
    }
}

impl<E: FilterEngine> Executor<E> {
    pub fn with_engine(engine: E, config: ExecutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.effective_capacity(config.cache_capacity);
        let cache = FilterCache::with_policy(capacity, config.sweep_policy).map_err(|_| {
            ConfigError::Invalid {
                key: "cache_capacity".to_string(),
                value: capacity.to_string(),
                reason: "must be positive".to_string(),
            }
        })?;
        let scheduler = TaskScheduler::new(SchedulerConfig {
            workers: config.workers,
            ..SchedulerConfig::default()
        })
        .map_err(ConfigError::Workers)?;

        info!(
            capacity,
            workers = config.workers,
            policy = %config.sweep_policy,
            "executor ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                core: Arc::new(Core {
                    engine,
                    cache,
                    coordinator: ExecutionCoordinator::new(),
                    config,
                }),
                scheduler,
            }),
        })
    }

    fn key(filter: &str, options: &EvalOptions) -> FilterKey {
        FilterKey::new(filter).with_env(options.enable_env)
    }

    fn timeout(&self, options: &EvalOptions) -> Option<Duration> {
        options.timeout.or(self.inner.core.config.default_timeout)
    }

    /// Evaluate on the calling thread and return the first output.
    pub fn evaluate_sync(&self, json: &str, filter: &str) -> Result<Evaluation, ExecError> {
        self.evaluate_sync_with(json, filter, &EvalOptions::default())
    }

    pub fn evaluate_sync_with(
        &self,
        json: &str,
        filter: &str,
        options: &EvalOptions,
    ) -> Result<Evaluation, ExecError> {
        let key = Self::key(filter, options);
        self.inner.core.evaluate(json, &key, self.timeout(options))
    }

    /// Evaluate on the worker pool. All cache and lock bookkeeping happens on
    /// the worker; the returned future only carries the result.
    pub fn evaluate_async(
        &self,
        json: impl Into<String>,
        filter: &str,
        timeout: Option<Duration>,
    ) -> EvalFuture {
        let options = EvalOptions {
            timeout,
            ..EvalOptions::default()
        };
        self.evaluate_async_with(json, filter, &options)
    }

    pub fn evaluate_async_with(
        &self,
        json: impl Into<String>,
        filter: &str,
        options: &EvalOptions,
    ) -> EvalFuture {
        let (promise, completion) = completion();
        let core = Arc::clone(&self.inner.core);
        let json = json.into();
        let key = Self::key(filter, options);
        let timeout = self.timeout(options);

        // If the pool is gone the promise is dropped and the future resolves as cancelled.
        let _join = self.inner.scheduler.spawn_fn(None, move || {
            // Leases and guards unwind normally; only the caller needs telling.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                core.evaluate(&json, &key, timeout)
            }))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(filter = %key, %message, "evaluation panicked");
                Err(ExecError::Runtime(format!("evaluation panicked: {message}")))
            });
            promise.fulfil(outcome);
        });
        EvalFuture::new(completion)
    }

    /// Resize the cache, never below the configured minimum. Returns the
    /// capacity in effect.
    pub fn set_cache_capacity(&self, capacity: usize) -> Result<usize, ExecError> {
        if capacity == 0 {
            return Err(CapacityError::NonPositive.into());
        }
        let core = &self.inner.core;
        let effective = core.config.effective_capacity(capacity);
        if effective != capacity {
            debug!(requested = capacity, effective, "capacity raised to configured minimum");
        }
        Ok(core.cache.resize(effective)?)
    }

    /// Lenient evaluation: serialises `input`, accepts single-quoted string
    /// literals, and returns `null` on any failure.
    pub fn exec(&self, input: &Value, filter: &str, options: &ExecOptions) -> Value {
        let json = self.inner.core.engine.serialize(input);
        let filter = normalize_quotes(filter);
        match self.evaluate_sync_with(&json, &filter, options) {
            Ok(evaluation) => evaluation.into_value(),
            Err(error) => {
                debug!(%filter, %error, "exec failed, returning null");
                Value::Null
            }
        }
    }

    /// [`Executor::exec`] on the worker pool.
    pub async fn exec_async(&self, input: &Value, filter: &str, options: &ExecOptions) -> Value {
        let json = self.inner.core.engine.serialize(input);
        let filter = normalize_quotes(filter);
        match self.evaluate_async_with(json, &filter, options).await {
            Ok(evaluation) => evaluation.into_value(),
            Err(error) => {
                debug!(%filter, %error, "exec failed, returning null");
                Value::Null
            }
        }
    }

    pub fn engine(&self) -> &E {
        &self.inner.core.engine
    }

    pub fn cache(&self) -> &FilterCache<E::Program> {
        &self.inner.core.cache
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.core.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.core.cache.stats()
    }

    pub fn cache_metadata(&self, filter: &str) -> Option<CacheMetadata> {
        self.inner.core.cache.metadata(&FilterKey::new(filter))
    }

    pub fn coordinator_stats(&self) -> CoordinatorStats {
        self.inner.core.coordinator.stats()
    }

    pub fn task_metrics(&self) -> TaskMetricsSnapshot {
        self.inner.scheduler.metrics()
    }
}

static DEFAULT_EXECUTOR: OnceCell<Executor> = OnceCell::new();

/// Process-wide executor built from [`ExecutorConfig::from_env`] on first use.
pub fn default_executor() -> Result<&'static Executor, ConfigError> {
    DEFAULT_EXECUTOR.get_or_try_init(|| Executor::new(ExecutorConfig::from_env()?))
}
