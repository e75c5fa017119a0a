//! Executor configuration: defaults, an optional TOML file, then environment
//! variables, each layer overriding the one before.

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::SweepPolicy;

pub const ENV_CACHE_CAPACITY: &str = "JQEXEC_CACHE_CAPACITY";
pub const ENV_WORKERS: &str = "JQEXEC_WORKERS";
pub const ENV_TIMEOUT_SECS: &str = "JQEXEC_TIMEOUT_SECS";

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[cfg(feature = "toml-config")]
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to start worker threads")]
    Workers(#[source] io::Error),
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    pub cache_capacity: usize,
    /// Floor for capacity changes. Follows `workers` when unset.
    pub min_capacity: Option<usize>,
    pub workers: usize,
    #[serde(with = "seconds")]
    pub default_timeout: Option<Duration>,
    pub sweep_policy: SweepPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            min_capacity: None,
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            default_timeout: None,
            sweep_policy: SweepPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Apply `JQEXEC_*` overrides read through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CACHE_CAPACITY) {
            self.cache_capacity = parse_positive(ENV_CACHE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = parse_positive(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            self.default_timeout = Some(parse_seconds(ENV_TIMEOUT_SECS, &value)?);
        }
        Ok(self)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Defaults overridden by a TOML file.
    #[cfg(feature = "toml-config")]
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity.unwrap_or(self.workers)
    }

    /// Capacity actually used for a request of `requested` entries.
    pub fn effective_capacity(&self, requested: usize) -> usize {
        requested.max(self.min_capacity())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache_capacity", 0, "must be positive"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", 0, "must be positive"));
        }
        if self.min_capacity == Some(0) {
            return Err(ConfigError::invalid("min_capacity", 0, "must be positive"));
        }
        if self.default_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::invalid("default_timeout", 0, "must be positive"));
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match usize::from_str(value.trim()) {
        Ok(0) => Err(ConfigError::invalid(key, value, "must be positive")),
        Ok(parsed) => Ok(parsed),
        Err(error) => Err(ConfigError::invalid(key, value, error.to_string())),
    }
}

pub(crate) fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let seconds = f64::from_str(value.trim())
        .map_err(|error| ConfigError::invalid(key, value, error.to_string()))?;
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| !duration.is_zero())
        .ok_or_else(|| ConfigError::invalid(key, value, "must be a positive number of seconds"))
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let seconds: Option<f64> = Option::deserialize(deserializer)?;
        seconds
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn min_capacity_follows_workers() {
        let config = ExecutorConfig {
            workers: 6,
            ..ExecutorConfig::default()
        };
        assert_eq!(config.min_capacity(), 6);
        assert_eq!(config.effective_capacity(2), 6);
        assert_eq!(config.effective_capacity(50), 50);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ExecutorConfig::default()
            .with_env(lookup(&[
                (ENV_CACHE_CAPACITY, "12"),
                (ENV_WORKERS, "3"),
                (ENV_TIMEOUT_SECS, "1.5"),
            ]))
            .unwrap();
        assert_eq!(config.cache_capacity, 12);
        assert_eq!(config.workers, 3);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn env_rejects_zero_and_garbage() {
        assert!(ExecutorConfig::default().with_env(lookup(&[(ENV_WORKERS, "0")])).is_err());
        assert!(ExecutorConfig::default().with_env(lookup(&[(ENV_CACHE_CAPACITY, "many")])).is_err());
        assert!(ExecutorConfig::default().with_env(lookup(&[(ENV_TIMEOUT_SECS, "-1")])).is_err());
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let config = ExecutorConfig {
            default_timeout: Some(Duration::ZERO),
            ..ExecutorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "default_timeout"
        ));

        let config = ExecutorConfig {
            default_timeout: Some(Duration::from_millis(1)),
            ..ExecutorConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn loads_toml_file() -> anyhow::Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "cache_capacity = 8\nworkers = 2\ndefault_timeout = 0.25\nsweep_policy = \"skip-busy\"")?;
        let config = ExecutorConfig::load(file.path())?;
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.min_capacity(), 2);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.sweep_policy, SweepPolicy::SkipBusy);
        Ok(())
    }
}
