//! Testing utilities for firebus applications.
//!
//! Handlers run on worker threads and their failures never reach the caller,
//! so tests observe a dispatcher from the side: a [`RecordingSink`] captures
//! failure reports and a [`CallRecorder`] captures which handlers ran, in
//! which order. Both are cheap handles over shared state; clone one into the
//! dispatcher or a handler closure and keep the other for assertions.
//!
//! # Examples
//!
//! ```rust
//! use firebus::testing::{CallRecorder, RecordingSink};
//! use firebus::{Dispatcher, Event};
//!
//! #[derive(Event, Debug)]
//! struct Ping;
//!
//! let sink = RecordingSink::new();
//! let dispatcher = Dispatcher::builder()
//!     .with_sink(sink.clone())
//!     .build()
//!     .unwrap();
//!
//! let calls = CallRecorder::new();
//! let recorder = calls.clone();
//! dispatcher.on(move |_: &Ping| recorder.record("ping"));
//! dispatcher.on(|_: &Ping| Err::<(), _>("nope"));
//!
//! dispatcher.fire(Ping).unwrap().wait().unwrap();
//!
//! assert_eq!(calls.calls(), ["ping"]);
//! assert_eq!(sink.len(), 1);
//! assert_eq!(sink.failures()[0].message, "Handler failed: nope");
//! ```

use crate::handler::ListenerId;
use crate::priority::PostOrder;
use crate::sink::{FailureSink, HandlerFailure};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Owned copy of a [`HandlerFailure`], with the error rendered to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Identity of the listener that owns the handler.
    pub listener: ListenerId,
    /// Type name of the listener.
    pub listener_name: &'static str,
    /// Name of the handler.
    pub handler_name: &'static str,
    /// Name of the event type.
    pub event_type: &'static str,
    /// Priority the handler was registered with.
    pub priority: PostOrder,
    /// Display output of the handler error.
    pub message: String,
}

impl From<&HandlerFailure> for FailureRecord {
    fn from(failure: &HandlerFailure) -> Self {
        Self {
            listener: failure.listener,
            listener_name: failure.listener_name,
            handler_name: failure.handler_name,
            event_type: failure.event_type,
            priority: failure.priority,
            message: failure.error.to_string(),
        }
    }
}

/// Append-only log that lets a test block until enough entries arrived.
#[derive(Debug)]
struct Journal<T> {
    entries: Mutex<Vec<T>>,
    grew: Condvar,
}

impl<T: Clone> Journal<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            grew: Condvar::new(),
        }
    }

    // Assertion failures in a handler may poison the lock; the log itself is
    // still intact.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: T) {
        self.lock().push(entry);
        self.grew.notify_all();
    }

    fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut entries = self.lock();
        while entries.len() < count {
            let Some(deadline) = deadline else {
                entries = self.grew.wait(entries).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            entries = self
                .grew
                .wait_timeout(entries, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// A [`FailureSink`] that keeps every failure it receives.
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    journal: Arc<Journal<FailureRecord>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            journal: Arc::new(Journal::new()),
        }
    }

    /// Returns the failures received so far, in arrival order.
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.journal.lock().clone()
    }

    /// Returns the number of failures received.
    pub fn len(&self) -> usize {
        self.journal.lock().len()
    }

    /// Returns whether no failure was received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every recorded failure.
    pub fn clear(&self) {
        self.journal.lock().clear();
    }

    /// Blocks until at least `count` failures were received or `timeout`
    /// elapsed. Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.journal.wait_for(count, timeout)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureSink for RecordingSink {
    fn handler_failed(&self, failure: &HandlerFailure) {
        self.journal.push(FailureRecord::from(failure));
    }
}

/// Records labelled calls from handler bodies.
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct CallRecorder {
    journal: Arc<Journal<String>>,
}

impl CallRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            journal: Arc::new(Journal::new()),
        }
    }

    /// Appends `label` to the log.
    pub fn record<S: Into<String>>(&self, label: S) {
        self.journal.push(label.into());
    }

    /// Returns the recorded labels in the order they were recorded.
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Returns the number of recorded calls.
    pub fn count(&self) -> usize {
        self.journal.lock().len()
    }

    /// Returns how many times `label` was recorded.
    pub fn count_of(&self, label: &str) -> usize {
        self.journal
            .lock()
            .iter()
            .filter(|recorded| recorded.as_str() == label)
            .count()
    }

    /// Blocks until at least `count` calls were recorded or `timeout`
    /// elapsed. Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.journal.wait_for(count, timeout)
    }

    /// Panics unless exactly `expected` calls were recorded.
    pub fn assert_count(&self, expected: usize) {
        let actual = self.count();
        assert_eq!(
            actual, expected,
            "Expected {expected} recorded calls, but found {actual}"
        );
    }
}

impl Default for CallRecorder {
    fn default() -> Self {
        Self::new()
    }
}
