//! Handler descriptors.
//!
//! A [`HandlerDescriptor`] is the unit the registry stores and the dispatcher
//! schedules: the identity of the listener that owns it, its priority, the
//! exact event type it is keyed under, and a type-erased invoke function.

use crate::error::{HandlerError, HandlerResult};
use crate::event::Event;
use crate::priority::PostOrder;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identity of a listener instance.
///
/// Two ids are equal only when they were taken from the same allocation (the
/// same `Arc`), never because two listeners compare equal by value.
///
/// Handlers bound through [`Dispatcher::register`](crate::Dispatcher::register)
/// hold a clone of the listener's `Arc`, so that id cannot be reused while
/// they are registered. An id handed to
/// [`Dispatcher::register_handlers`](crate::Dispatcher::register_handlers) or
/// [`Dispatcher::subscribe`](crate::Dispatcher::subscribe) keeps nothing
/// alive: once the allocation it was taken from is freed, a new listener may
/// receive the same id. Prefer [`ListenerId::anonymous`] for owners that are
/// not tied to a live `Arc`.
///
/// # Examples
///
/// ```rust
/// use firebus::ListenerId;
/// use std::sync::Arc;
///
/// let a = Arc::new(5u32);
/// let b = Arc::new(5u32);
///
/// assert_eq!(ListenerId::of(&a), ListenerId::of(&Arc::clone(&a)));
/// assert_ne!(ListenerId::of(&a), ListenerId::of(&b));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    /// Returns the identity of the listener behind `listener`.
    pub fn of<L: ?Sized>(listener: &Arc<L>) -> Self {
        Self(Arc::as_ptr(listener) as *const () as usize)
    }

    /// Creates a fresh identity not tied to any allocation.
    ///
    /// Used for owners of free-standing closure handlers. Anonymous ids have
    /// their lowest bit set; `Arc` data pointers sit behind the word-aligned
    /// reference counts and never do.
    pub fn anonymous() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        Self((COUNTER.fetch_add(1, Ordering::Relaxed) << 1) | 1)
    }

    /// Returns the raw numeric value of this id.
    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({:#x})", self.0)
    }
}

/// Converts a handler's return value into a handler result.
///
/// Implemented for `()` and for `Result<(), E>` where `E` can be boxed into
/// a standard error, so handler methods may be infallible or fallible.
pub trait HandlerOutcome {
    /// Converts this value into a handler result.
    fn into_handler_result(self) -> HandlerResult<()>;
}

impl HandlerOutcome for () {
    fn into_handler_result(self) -> HandlerResult<()> {
        Ok(())
    }
}

impl<E> HandlerOutcome for Result<(), E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn into_handler_result(self) -> HandlerResult<()> {
        self.map_err(HandlerError::failed)
    }
}

type InvokeFn = dyn Fn(&(dyn Any + Send + Sync)) -> HandlerResult<()> + Send + Sync;

/// A handler bound to one listener, one event type and one priority.
#[derive(Clone)]
pub struct HandlerDescriptor {
    owner: ListenerId,
    owner_name: &'static str,
    handler_name: &'static str,
    priority: PostOrder,
    event_type: TypeId,
    event_type_name: &'static str,
    invoke: Arc<InvokeFn>,
}

impl HandlerDescriptor {
    /// Creates a descriptor for a handler of events of type `E`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use firebus::{Event, HandlerDescriptor, ListenerId, PostOrder};
    ///
    /// #[derive(Event)]
    /// struct Ping;
    ///
    /// let descriptor = HandlerDescriptor::new(
    ///     ListenerId::anonymous(),
    ///     PostOrder::Early,
    ///     |_: &Ping| println!("pong"),
    /// );
    /// assert_eq!(descriptor.priority(), PostOrder::Early);
    /// ```
    pub fn new<E, R, F>(owner: ListenerId, priority: PostOrder, handler: F) -> Self
    where
        E: Event,
        R: HandlerOutcome,
        F: Fn(&E) -> R + Send + Sync + 'static,
    {
        let invoke = move |event: &(dyn Any + Send + Sync)| match event.downcast_ref::<E>() {
            Some(event) => handler(event).into_handler_result(),
            None => Err(HandlerError::TypeMismatch {
                expected: E::event_type_name(),
            }),
        };

        Self {
            owner,
            owner_name: "anonymous",
            handler_name: std::any::type_name::<F>(),
            priority,
            event_type: TypeId::of::<E>(),
            event_type_name: E::event_type_name(),
            invoke: Arc::new(invoke),
        }
    }

    /// Sets the human readable name of the handler used in failure reports.
    pub fn with_name(mut self, handler_name: &'static str) -> Self {
        self.handler_name = handler_name;
        self
    }

    /// Moves the descriptor under another owner.
    pub fn with_owner(mut self, owner: ListenerId) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the human readable name of the owning listener.
    pub fn with_owner_name(mut self, owner_name: &'static str) -> Self {
        self.owner_name = owner_name;
        self
    }

    /// Returns the identity of the owning listener.
    pub fn owner(&self) -> ListenerId {
        self.owner
    }

    /// Returns the name of the owning listener.
    pub fn owner_name(&self) -> &'static str {
        self.owner_name
    }

    /// Returns the handler name.
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Returns the submission priority.
    pub fn priority(&self) -> PostOrder {
        self.priority
    }

    /// Returns the exact event type this handler is keyed under.
    pub fn event_type(&self) -> TypeId {
        self.event_type
    }

    /// Returns the name of the event type.
    pub fn event_type_name(&self) -> &'static str {
        self.event_type_name
    }

    /// Invokes the handler with a type-erased event.
    pub fn invoke(&self, event: &(dyn Any + Send + Sync)) -> HandlerResult<()> {
        (self.invoke)(event)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("owner", &self.owner)
            .field("owner_name", &self.owner_name)
            .field("handler_name", &self.handler_name)
            .field("priority", &self.priority)
            .field("event_type", &self.event_type_name)
            .finish()
    }
}
