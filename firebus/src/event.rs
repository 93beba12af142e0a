//! Core event trait.
//!
//! Every value fired through a [`Dispatcher`](crate::Dispatcher) implements
//! [`Event`]. Routing is keyed on the exact concrete type of the value, so two
//! distinct types never share handlers even when one wraps the other.

use crate::error::EventValidationError;

/// Core trait that all events must implement.
///
/// Events are shared between concurrently running handlers behind an `Arc`,
/// so they must be `Send + Sync + 'static`. They do not need to be `Clone`.
///
/// Most events should use `#[derive(Event)]`.
///
/// # Examples
///
/// ```rust
/// use firebus::Event;
///
/// #[derive(Event, Debug)]
/// struct UserLoggedIn {
///     user_id: u64,
/// }
///
/// assert_eq!(UserLoggedIn::event_type_name(), "UserLoggedIn");
/// ```
///
/// # Manual Implementation
///
/// ```rust
/// use firebus::{Event, EventValidationError};
///
/// struct EmailQueued {
///     to: String,
/// }
///
/// impl Event for EmailQueued {
///     fn validate(&self) -> Result<(), EventValidationError> {
///         if self.to.is_empty() {
///             return Err(EventValidationError::missing_field("to"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Event: Send + Sync + 'static {
    /// Returns the name of the event type.
    ///
    /// Used in logs and failure reports. The default implementation uses the
    /// full type name including module path.
    fn event_type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Validates the event before any handler is scheduled.
    ///
    /// A failure is returned synchronously from `fire` as
    /// [`DispatchError::InvalidArgument`](crate::DispatchError::InvalidArgument).
    fn validate(&self) -> Result<(), EventValidationError> {
        Ok(())
    }

    /// Returns a short description of this event for logging.
    ///
    /// The dispatcher logs it at trace level on every fire. Override this to
    /// add identifying fields or to keep sensitive payloads out of logs.
    fn log_description(&self) -> String
    where
        Self: Sized,
    {
        Self::event_type_name().to_string()
    }
}
