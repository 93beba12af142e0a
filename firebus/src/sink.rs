//! Failure reporting boundary.
//!
//! Handler failures never travel back to the code that fired the event. They
//! are caught at the task boundary and handed to the [`FailureSink`] supplied
//! when the dispatcher was built. The default sink, [`TracingSink`], emits a
//! `tracing` error event.

use crate::error::HandlerError;
use crate::handler::{HandlerDescriptor, ListenerId};
use crate::priority::PostOrder;
use std::fmt;

/// Context of one failed handler invocation.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Identity of the listener that owns the handler.
    pub listener: ListenerId,
    /// Type name of the listener.
    pub listener_name: &'static str,
    /// Name of the handler.
    pub handler_name: &'static str,
    /// Name of the event type being dispatched.
    pub event_type: &'static str,
    /// Priority the handler was registered with.
    pub priority: PostOrder,
    /// What went wrong.
    pub error: HandlerError,
}

impl HandlerFailure {
    pub(crate) fn new(descriptor: &HandlerDescriptor, error: HandlerError) -> Self {
        Self {
            listener: descriptor.owner(),
            listener_name: descriptor.owner_name(),
            handler_name: descriptor.handler_name(),
            event_type: descriptor.event_type_name(),
            priority: descriptor.priority(),
            error,
        }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error while processing event {} in {}::{} ({}, priority {}): {}",
            self.event_type,
            self.listener_name,
            self.handler_name,
            self.listener,
            self.priority,
            self.error
        )
    }
}

/// Receives handler failures.
///
/// Called from executor worker threads, possibly concurrently. A sink that
/// panics is a fault outside the handler boundary: the fire call's
/// completion, if one was requested, resolves to an aggregation error.
pub trait FailureSink: Send + Sync + 'static {
    /// Reports one failed handler invocation.
    fn handler_failed(&self, failure: &HandlerFailure);
}

impl<F> FailureSink for F
where
    F: Fn(&HandlerFailure) + Send + Sync + 'static,
{
    fn handler_failed(&self, failure: &HandlerFailure) {
        self(failure)
    }
}

/// Logs handler failures as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn handler_failed(&self, failure: &HandlerFailure) {
        tracing::error!(
            listener = %failure.listener,
            listener_name = failure.listener_name,
            handler = failure.handler_name,
            event = failure.event_type,
            priority = %failure.priority,
            error = %failure.error,
            "Error while processing event"
        );
    }
}
