//! Workflow configuration.
//!
//! Loaded from a JSON file with serde defaults for every field, then
//! overlaid from `CURAFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::runner::RetryConfig;
use crate::utils::millis;

/// Sizing of the CPU worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrently executing CPU stages.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum CPU requests waiting for a worker.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get)
}

fn default_max_queued() -> usize {
    64
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_queued: default_max_queued(),
        }
    }
}

/// Configuration for a [`WorkflowController`](crate::workflow::WorkflowController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// CPU worker pool sizing.
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    /// Per-attempt stage time limit, unless the stage sets its own.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Retry policy, unless the stage sets its own.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// How long shutdown waits for spawned work.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Settings every stage receives; per-run overrides are merged over these.
    #[serde(default = "default_stage_defaults")]
    pub stage_defaults: serde_json::Value,
}

fn default_stage_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_stage_defaults() -> serde_json::Value {
    serde_json::json!({})
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            worker_pool: WorkerPoolConfig::default(),
            stage_timeout_ms: default_stage_timeout_ms(),
            retry: RetryConfig::default(),
            broadcast_capacity: default_broadcast_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stage_defaults: default_stage_defaults(),
        }
    }
}

impl WorkflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays `CURAFLOW_*` environment variables.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays variables resolved by `lookup`.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = env_number(&lookup, "CURAFLOW_WORKERS")? {
            self.worker_pool.max_workers = v;
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_QUEUE")? {
            self.worker_pool.max_queued = v;
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_STAGE_TIMEOUT_MS")? {
            self.stage_timeout_ms = v;
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_RETRY_MAX_ATTEMPTS")? {
            self.retry = self.retry.with_max_attempts(v);
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_RETRY_BASE_DELAY_MS")? {
            self.retry = self.retry.with_base_delay_ms(v);
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_BROADCAST_CAPACITY")? {
            self.broadcast_capacity = v;
        }
        if let Some(v) = env_number(&lookup, "CURAFLOW_SHUTDOWN_GRACE_MS")? {
            self.shutdown_grace_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.worker_pool.max_workers == 0 {
            return Err(invalid("worker_pool.max_workers", "must be at least 1"));
        }
        if self.broadcast_capacity == 0 {
            return Err(invalid("broadcast_capacity", "must be at least 1"));
        }
        if self.stage_timeout_ms == 0 {
            return Err(invalid("stage_timeout_ms", "must be positive"));
        }
        if !self.stage_defaults.is_object() {
            return Err(invalid("stage_defaults", "must be a JSON object"));
        }
        Ok(())
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_workers(mut self, max_workers: usize, max_queued: usize) -> Self {
        self.worker_pool = WorkerPoolConfig {
            max_workers,
            max_queued,
        };
        self
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-subscriber buffer size.
    #[must_use]
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the default stage settings.
    #[must_use]
    pub fn with_stage_defaults(mut self, defaults: serde_json::Value) -> Self {
        self.stage_defaults = defaults;
        self
    }

    /// Returns the default stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        millis(self.stage_timeout_ms)
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        millis(self.shutdown_grace_ms)
    }
}

fn env_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Env {
            var: var.to_string(),
            value,
        }),
    }
}

/// Recursively merges `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                deep_merge(base.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: WorkflowConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.worker_pool.max_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curaflow.json");
        std::fs::write(
            &path,
            r#"{"worker_pool": {"max_workers": 3}, "stage_timeout_ms": 1500,
                "retry": {"max_attempts": 5}, "stage_defaults": {"model": "gpt-4o"}}"#,
        )
        .unwrap();

        let config = WorkflowConfig::from_json_file(&path).unwrap();
        assert_eq!(config.worker_pool.max_workers, 3);
        assert_eq!(config.worker_pool.max_queued, 64);
        assert_eq!(config.stage_timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.stage_defaults["model"], "gpt-4o");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = WorkflowConfig::from_json_file("/nonexistent/curaflow.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [("CURAFLOW_WORKERS", "6"), ("CURAFLOW_BROADCAST_CAPACITY", " 32 ")].into();
        let config = WorkflowConfig::new()
            .apply_env_from(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.worker_pool.max_workers, 6);
        assert_eq!(config.broadcast_capacity, 32);
    }

    #[test]
    fn test_env_rejects_garbage_and_zero() {
        let err = WorkflowConfig::new()
            .apply_env_from(|k| (k == "CURAFLOW_QUEUE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "CURAFLOW_QUEUE"));

        let err = WorkflowConfig::new()
            .apply_env_from(|k| (k == "CURAFLOW_WORKERS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_deep_merge() {
        let mut base = json!({"model": "a", "llm": {"temperature": 0.7, "max_tokens": 512}});
        deep_merge(&mut base, &json!({"llm": {"temperature": 0.2}, "region": "US"}));
        assert_eq!(
            base,
            json!({"model": "a", "llm": {"temperature": 0.2, "max_tokens": 512}, "region": "US"})
        );
    }
}
