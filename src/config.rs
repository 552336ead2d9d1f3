//! Manager configuration types.
//!
//! [`ManagerConfig`] holds the concrete values that drive a
//! [`TaskManager`](crate::TaskManager). Construct one, adjust the fields
//! you care about, and pass it to `TaskManager::new`, which normalizes and
//! validates it.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `name` | `"taskweave"` |
//! | `thread_tag` | `"worker"` |
//! | `worker_count` | available CPU parallelism |
//! | `thread_priority` | `Normal` |
//! | `stack_size` | 1 MiB |
//! | `pinning` | `None` |
//! | `affinities` | `None` |
//! | `queue_capacity` | 256 |
//! | `max_fibers` | 128 |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i runs on logical processor i).
    Linear,
}

/// OS scheduling class requested for worker threads.
///
/// Recorded for diagnostics and applied where the platform exposes a safe
/// API; on other platforms the value is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadPriority {
    /// Default OS scheduling class.
    #[default]
    Normal,
    /// Elevated scheduling class.
    High,
}

/// Errors produced by configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The explicit affinity list does not match the worker count.
    #[error("affinity list has {got} entries for {expected} workers")]
    AffinityArity {
        /// The configured worker count.
        expected: usize,
        /// The number of affinity entries supplied.
        got: usize,
    },
    /// The fiber budget cannot cover one loop fiber per worker plus at
    /// least one replacement for a blocked task.
    #[error("max_fibers {max_fibers} must exceed worker_count {worker_count}")]
    FiberBudget {
        /// The configured fiber ceiling.
        max_fibers: usize,
        /// The configured worker count.
        worker_count: usize,
    },
}

/// Configuration for a [`TaskManager`](crate::TaskManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Diagnostic label for this manager; prefixes thread names.
    pub name: String,
    /// Grouping tag for worker threads (diagnostics).
    pub thread_tag: String,
    /// Number of logical workers (default: available parallelism).
    pub worker_count: usize,
    /// OS scheduling class requested for worker threads.
    pub thread_priority: ThreadPriority,
    /// Stack size for fiber threads (default: 1 MiB).
    pub stack_size: usize,
    /// CPU pinning strategy when no explicit affinity list is given.
    pub pinning: PinningStrategy,
    /// Explicit per-worker core ids; overrides `pinning` when set.
    pub affinities: Option<Vec<usize>>,
    /// Capacity of each worker's task queue.
    pub queue_capacity: usize,
    /// Ceiling on the number of pooled fibers.
    pub max_fibers: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "taskweave".to_string(),
            thread_tag: "worker".to_string(),
            worker_count: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            thread_priority: ThreadPriority::default(),
            stack_size: 1024 * 1024,
            pinning: PinningStrategy::default(),
            affinities: None,
            queue_capacity: 256,
            max_fibers: 128,
        }
    }
}

impl ManagerConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_count == 0 {
            self.worker_count = 1;
        }
        if self.stack_size == 0 {
            self.stack_size = 1024 * 1024;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        if self.max_fibers <= self.worker_count {
            self.max_fibers = self.worker_count * 2;
        }
        if self.name.is_empty() {
            self.name = "taskweave".to_string();
        }
        if self.thread_tag.is_empty() {
            self.thread_tag = "worker".to_string();
        }
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the affinity list arity does not match
    /// the worker count, or when the fiber budget cannot cover the workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(affinities) = &self.affinities {
            if affinities.len() != self.worker_count {
                return Err(ConfigError::AffinityArity {
                    expected: self.worker_count,
                    got: affinities.len(),
                });
            }
        }
        if self.max_fibers <= self.worker_count {
            return Err(ConfigError::FiberBudget {
                max_fibers: self.max_fibers,
                worker_count: self.worker_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn normalize_repairs_zero_fields() {
        let mut config = ManagerConfig {
            worker_count: 0,
            stack_size: 0,
            queue_capacity: 0,
            name: String::new(),
            thread_tag: String::new(),
            ..ManagerConfig::default()
        };
        config.normalize();

        assert_eq!(config.worker_count, 1);
        assert_eq!(config.stack_size, 1024 * 1024);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.name, "taskweave");
        assert_eq!(config.thread_tag, "worker");
    }

    #[test]
    fn normalize_raises_fiber_ceiling() {
        let mut config = ManagerConfig {
            worker_count: 8,
            max_fibers: 4,
            ..ManagerConfig::default()
        };
        config.normalize();
        assert!(config.max_fibers > config.worker_count);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn affinity_arity_mismatch_rejected() {
        let config = ManagerConfig {
            worker_count: 4,
            affinities: Some(vec![0, 1]),
            ..ManagerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::AffinityArity {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn fiber_budget_must_exceed_workers() {
        let config = ManagerConfig {
            worker_count: 4,
            max_fibers: 4,
            ..ManagerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FiberBudget {
                max_fibers: 4,
                worker_count: 4
            })
        );
    }
}
