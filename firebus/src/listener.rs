//! Handler binding.
//!
//! A [`Listener`] describes which of its methods handle which events. Binding
//! turns a listener instance into a list of [`HandlerDescriptor`]s that the
//! registry stores; the dispatcher itself never inspects listeners.
//!
//! Implement the trait by hand with a [`Binder`], or let
//! `#[listener]` generate it from `#[subscribe]` methods:
//!
//! ```rust
//! use firebus::{listener, Event, PostOrder};
//!
//! #[derive(Event)]
//! struct Ping;
//!
//! struct Audit;
//!
//! #[listener]
//! impl Audit {
//!     #[subscribe(priority = Early)]
//!     pub fn on_ping(&self, _event: &Ping) {}
//! }
//!
//! let handlers = firebus::listener::bind(&std::sync::Arc::new(Audit));
//! assert_eq!(handlers.len(), 1);
//! assert_eq!(handlers[0].priority(), PostOrder::Early);
//! ```

use crate::event::Event;
use crate::handler::{HandlerDescriptor, HandlerOutcome, ListenerId};
use crate::priority::PostOrder;
use std::sync::Arc;

/// A type whose instances own event handlers.
pub trait Listener: Send + Sync + 'static {
    /// Declares this listener's handlers on `binder`.
    fn bind(binder: &mut Binder<Self>)
    where
        Self: Sized;
}

/// Collects the handlers of one listener instance.
///
/// Every handler closure holds a clone of the listener's `Arc`, so a
/// registered listener stays alive until it is unregistered.
pub struct Binder<L> {
    listener: Arc<L>,
    id: ListenerId,
    handlers: Vec<HandlerDescriptor>,
}

impl<L: Send + Sync + 'static> Binder<L> {
    /// Creates an empty binder for `listener`.
    pub fn new(listener: &Arc<L>) -> Self {
        Self {
            listener: Arc::clone(listener),
            id: ListenerId::of(listener),
            handlers: Vec::new(),
        }
    }

    /// Returns the listener being bound.
    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }

    /// Returns the identity under which handlers will be registered.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Adds a handler for events of type `E`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use firebus::{Binder, Event, Listener, PostOrder};
    ///
    /// #[derive(Event)]
    /// struct Ping;
    ///
    /// struct Counter;
    ///
    /// impl Counter {
    ///     fn on_ping(&self, _event: &Ping) {}
    /// }
    ///
    /// impl Listener for Counter {
    ///     fn bind(binder: &mut Binder<Self>) {
    ///         binder.subscribe(PostOrder::Late, "on_ping", Self::on_ping);
    ///     }
    /// }
    /// ```
    pub fn subscribe<E, R, F>(
        &mut self,
        priority: PostOrder,
        name: &'static str,
        handler: F,
    ) -> &mut Self
    where
        E: Event,
        R: HandlerOutcome,
        F: Fn(&L, &E) -> R + Send + Sync + 'static,
    {
        let listener = Arc::clone(&self.listener);
        let descriptor = HandlerDescriptor::new(self.id, priority, move |event: &E| {
            handler(&*listener, event)
        })
        .with_name(name)
        .with_owner_name(std::any::type_name::<L>());

        self.handlers.push(descriptor);
        self
    }

    /// Consumes the binder and returns the collected handlers.
    pub fn finish(self) -> Vec<HandlerDescriptor> {
        self.handlers
    }
}

/// Binds `listener` and returns its handler descriptors.
pub fn bind<L: Listener>(listener: &Arc<L>) -> Vec<HandlerDescriptor> {
    let mut binder = Binder::new(listener);
    L::bind(&mut binder);
    binder.finish()
}
