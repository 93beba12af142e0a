//! Dispatcher configuration.

#[cfg(feature = "serde")]
use crate::error::{DispatchError, DispatchResult};
use crate::priority::PostOrder;
use std::time::Duration;

/// Configuration options for the [`Dispatcher`](crate::Dispatcher).
///
/// # Examples
///
/// ```rust
/// use firebus::{DispatcherConfig, PostOrder};
/// use std::time::Duration;
///
/// let config = DispatcherConfig {
///     default_priority: PostOrder::Late,
///     shutdown_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert!(config.validate_events);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatcherConfig {
    /// Whether to run [`Event::validate`](crate::Event::validate) before dispatch.
    pub validate_events: bool,

    /// Priority used by registrations that do not name one.
    pub default_priority: PostOrder,

    /// Drain window used by [`Dispatcher::shutdown_default`](crate::Dispatcher::shutdown_default).
    pub shutdown_timeout: Duration,

    /// Worker pool settings.
    pub executor: ExecutorConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            validate_events: true,
            default_priority: PostOrder::Normal,
            shutdown_timeout: Duration::from_secs(10),
            executor: ExecutorConfig::default(),
        }
    }
}

#[cfg(feature = "serde")]
impl DispatcherConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> DispatchResult<Self> {
        serde_json::from_str(json).map_err(|error| DispatchError::configuration(error.to_string()))
    }
}

/// Configuration of the worker pool that runs handler invocations.
///
/// Workers are started on demand and retired after `idle_timeout` without
/// work. The pool settings apply only when the executor owns its runtime; on
/// an ambient or supplied runtime the host runtime's blocking pool settings
/// are used instead.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExecutorConfig {
    /// Name given to worker threads.
    pub thread_name: String,

    /// Ceiling on concurrently running workers.
    pub max_worker_threads: usize,

    /// How long an idle worker is kept before it is reclaimed.
    pub idle_timeout: Duration,

    /// Whether to run on the tokio runtime current at construction, if any.
    pub use_ambient_runtime: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "firebus-worker".to_string(),
            max_worker_threads: 512,
            idle_timeout: Duration::from_secs(10),
            use_ambient_runtime: true,
        }
    }
}
