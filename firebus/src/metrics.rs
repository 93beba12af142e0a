//! Dispatch counters.
//!
//! [`DispatchMetrics`] keeps lock-free counters of what the dispatcher has
//! done. With the `metrics` feature the same counters are mirrored into
//! `prometheus` counters registered on a caller-supplied registry.
//!
//! # Examples
//!
//! ```rust
//! use firebus::DispatchMetrics;
//!
//! let metrics = DispatchMetrics::new();
//! metrics.record_fire(3);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.events_fired, 1);
//! assert_eq!(snapshot.handlers_submitted, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "metrics")]
use prometheus::{IntCounter, Registry};

/// Point-in-time copy of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events accepted by `fire` or `fire_and_forget`.
    pub events_fired: u64,
    /// Handler tasks handed to the executor.
    pub handlers_submitted: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Fire calls rejected synchronously.
    pub fires_rejected: u64,
}

/// Dispatch counters shared by the dispatcher and its worker tasks.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    events_fired: AtomicU64,
    handlers_submitted: AtomicU64,
    handler_failures: AtomicU64,
    fires_rejected: AtomicU64,
    #[cfg(feature = "metrics")]
    exported: Option<PrometheusCounters>,
}

impl DispatchMetrics {
    /// Creates a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates counters that are also exported through `registry`.
    #[cfg(feature = "metrics")]
    pub fn with_registry(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            exported: Some(PrometheusCounters::register(registry)?),
            ..Self::default()
        })
    }

    /// Records an accepted fire call that submitted `handlers` tasks.
    pub fn record_fire(&self, handlers: usize) {
        self.events_fired.fetch_add(1, Ordering::Relaxed);
        self.handlers_submitted
            .fetch_add(handlers as u64, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        if let Some(exported) = &self.exported {
            exported.events_fired.inc();
            exported.handlers_submitted.inc_by(handlers as u64);
        }
    }

    /// Records one failed handler invocation.
    pub fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        if let Some(exported) = &self.exported {
            exported.handler_failures.inc();
        }
    }

    /// Records a fire call rejected before any task was scheduled.
    pub fn record_rejection(&self) {
        self.fires_rejected.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        if let Some(exported) = &self.exported {
            exported.fires_rejected.inc();
        }
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_fired: self.events_fired.load(Ordering::Relaxed),
            handlers_submitted: self.handlers_submitted.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            fires_rejected: self.fires_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(feature = "metrics")]
struct PrometheusCounters {
    events_fired: IntCounter,
    handlers_submitted: IntCounter,
    handler_failures: IntCounter,
    fires_rejected: IntCounter,
}

#[cfg(feature = "metrics")]
impl std::fmt::Debug for PrometheusCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusCounters").finish_non_exhaustive()
    }
}

#[cfg(feature = "metrics")]
impl PrometheusCounters {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            events_fired: counter("firebus_events_fired_total", "Events accepted for dispatch")?,
            handlers_submitted: counter(
                "firebus_handlers_submitted_total",
                "Handler tasks submitted to the executor",
            )?,
            handler_failures: counter(
                "firebus_handler_failures_total",
                "Handler invocations that failed or panicked",
            )?,
            fires_rejected: counter(
                "firebus_fires_rejected_total",
                "Fire calls rejected before scheduling",
            )?,
        })
    }
}
