//! Error types for firebus.
//!
//! This module defines the errors surfaced by the dispatcher: synchronous
//! rejections returned from `fire`, the asynchronous aggregation failure
//! carried by a [`Completion`](crate::Completion), and the handler-level
//! failures that are only ever reported to a [`FailureSink`](crate::FailureSink).

use thiserror::Error;

/// Errors returned by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The fired event failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] EventValidationError),

    /// The dispatcher has been shut down and no longer accepts events.
    #[error("Dispatcher is shut down")]
    ShutDown,

    /// The completion bookkeeping for a fire call faulted.
    ///
    /// This never wraps a handler failure; those are caught at the task
    /// boundary and reported to the failure sink.
    #[error("Aggregation failed: {message}")]
    Aggregation {
        /// Description of the fault.
        message: String,
    },

    /// The dispatcher could not be constructed.
    #[error("Configuration error: {message}")]
    Configuration {
        /// The configuration error message.
        message: String,
    },
}

/// Errors raised inside a handler body.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler panicked.
    #[error("Handler panicked: {message}")]
    Panic {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The handler returned an error.
    #[error("Handler failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    /// The handler was invoked with an event of the wrong type.
    ///
    /// Only reachable when a descriptor is registered under a type it was not
    /// bound for.
    #[error("Handler type mismatch: expected {expected}")]
    TypeMismatch {
        /// The event type the handler was bound to.
        expected: &'static str,
    },
}

/// Errors produced by [`Event::validate`](crate::Event::validate).
#[derive(Debug, Error)]
pub enum EventValidationError {
    /// A required field is missing from the event.
    #[error("Required field missing: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A field has an invalid value.
    #[error("Invalid field value: {field} = {value}")]
    InvalidValue {
        /// The name of the field with invalid value.
        field: String,
        /// The invalid value.
        value: String,
    },

    /// The event carries no payload where one is required.
    #[error("Event is empty")]
    Empty,

    /// Custom validation error with a specific message.
    #[error("Custom validation error: {message}")]
    Custom {
        /// The custom error message.
        message: String,
    },
}

/// Convenience type alias for dispatcher operation results.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Convenience type alias for handler invocation results.
pub type HandlerResult<T> = Result<T, HandlerError>;

impl DispatchError {
    /// Creates a new aggregation error.
    pub fn aggregation<S: Into<String>>(message: S) -> Self {
        Self::Aggregation {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns whether this error was raised synchronously by `fire`.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::ShutDown)
    }
}

impl HandlerError {
    /// Creates a new panic error.
    pub fn panic<S: Into<String>>(message: S) -> Self {
        Self::Panic {
            message: message.into(),
        }
    }

    /// Creates a new failure from any error type.
    pub fn failed<E: Into<Box<dyn std::error::Error + Send + Sync>>>(error: E) -> Self {
        Self::Failed(error.into())
    }

    /// Builds a panic error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panic { message }
    }
}

impl EventValidationError {
    /// Creates a new missing field error.
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a new invalid value error.
    pub fn invalid_value<S: Into<String>>(field: S, value: S) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a new custom validation error.
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}
