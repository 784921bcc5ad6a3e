//! Scheduler configuration

use crate::{RuntimeError, RuntimeResult};
use std::time::Duration;

/// Environment variable overriding [`SchedulerConfig::worker_threads`]
pub const WORKER_THREADS_ENV: &str = "STRAND_WORKER_THREADS";

/// Environment variable overriding [`SchedulerConfig::max_workers`]
pub const MAX_WORKERS_ENV: &str = "STRAND_MAX_WORKERS";

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of unblocked workers the pool keeps running (0 = number of CPU cores)
    pub worker_threads: usize,

    /// Hard cap on live worker threads, including compensating workers
    /// started while others are blocked (None = unbounded)
    ///
    /// A cap makes deeply nested `run_sync` calls able to deadlock once every
    /// live worker is blocked.
    pub max_workers: Option<usize>,

    /// Thread name prefix; workers are named `{thread_name}-{id}`
    pub thread_name: String,

    /// How long an idle worker parks before re-checking the queues
    pub park_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_workers: None,
            thread_name: "strand-worker".to_string(),
            park_timeout: Duration::from_millis(10),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `STRAND_WORKER_THREADS` / `STRAND_MAX_WORKERS` applied
    pub fn from_env() -> Self {
        Self::default().with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(WORKER_THREADS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(count) => self.worker_threads = count,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid {}", WORKER_THREADS_ENV),
            }
        }
        if let Some(raw) = lookup(MAX_WORKERS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(max) => self.max_workers = Some(max),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid {}", MAX_WORKERS_ENV),
            }
        }
        self
    }

    /// Set the number of workers
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Cap the number of live workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = Some(max);
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the idle park timeout
    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    /// Resolve defaults and check the configuration is usable
    pub(crate) fn resolve(mut self) -> RuntimeResult<Self> {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if let Some(max) = self.max_workers {
            if max < self.worker_threads {
                return Err(RuntimeError::InvalidConfig(format!(
                    "max_workers ({}) is below worker_threads ({})",
                    max, self.worker_threads
                )));
            }
        }
        if self.park_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "park_timeout must be non-zero".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads > 0);
        assert_eq!(config.max_workers, None);
        assert_eq!(config.thread_name, "strand-worker");
    }

    #[test]
    fn test_env_overrides() {
        let config = SchedulerConfig::default().with_env_lookup(|key| match key {
            WORKER_THREADS_ENV => Some("3".to_string()),
            MAX_WORKERS_ENV => Some(" 64 ".to_string()),
            _ => None,
        });
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_workers, Some(64));
    }

    #[test]
    fn test_invalid_env_ignored() {
        let base = SchedulerConfig::default().with_worker_threads(2);
        let config = base.clone().with_env_lookup(|key| match key {
            WORKER_THREADS_ENV => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(config, base);
    }

    #[test]
    fn test_zero_workers_resolves_to_cpus() {
        let config = SchedulerConfig::default()
            .with_worker_threads(0)
            .resolve()
            .unwrap();
        assert_eq!(config.worker_threads, num_cpus::get());
    }

    #[test]
    fn test_max_below_workers_rejected() {
        let result = SchedulerConfig::default()
            .with_worker_threads(4)
            .with_max_workers(2)
            .resolve();
        assert!(matches!(result, Err(RuntimeError::InvalidConfig(_))));
    }
}
