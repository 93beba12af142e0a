//! Cancellation marker for events.
//!
//! A cancellable event lets one handler tell later handlers (and the code that
//! fired the event, once the completion resolves) that the action it
//! describes should not happen. The dispatcher never reads this state: every
//! registered handler still runs, and handlers decide for themselves whether
//! to honour a cancellation.
//!
//! Events are shared by reference between concurrently running handlers, so
//! the state is set through `&self`.

use std::sync::atomic::{AtomicBool, Ordering};

/// An event whose action may be cancelled by a handler.
pub trait Cancellable {
    /// Returns whether the event has been cancelled.
    fn is_cancelled(&self) -> bool;

    /// Sets the cancellation state.
    fn set_cancelled(&self, cancel: bool);
}

/// A thread-safe cancellation flag to embed in events.
///
/// # Examples
///
/// ```rust
/// use firebus::{CancelFlag, Cancellable, Event};
///
/// #[derive(Event, Default)]
/// struct ChatMessage {
///     text: String,
///     cancelled: CancelFlag,
/// }
///
/// impl Cancellable for ChatMessage {
///     fn is_cancelled(&self) -> bool {
///         self.cancelled.is_cancelled()
///     }
///
///     fn set_cancelled(&self, cancel: bool) {
///         self.cancelled.set_cancelled(cancel)
///     }
/// }
///
/// let message = ChatMessage::default();
/// message.set_cancelled(true);
/// assert!(message.is_cancelled());
/// ```
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// Creates a flag in the given state.
    pub const fn new(cancelled: bool) -> Self {
        Self(AtomicBool::new(cancelled))
    }
}

impl Cancellable for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set_cancelled(&self, cancel: bool) {
        self.0.store(cancel, Ordering::Release);
    }
}

impl Clone for CancelFlag {
    fn clone(&self) -> Self {
        Self::new(self.is_cancelled())
    }
}
