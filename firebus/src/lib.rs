//! # firebus - In-Process Priority Event Dispatcher
//!
//! firebus is a process-local publish/subscribe dispatcher. Listener objects
//! register handler methods tagged with a [`PostOrder`]; producers fire typed
//! event values; the dispatcher looks up every handler registered for the
//! event's exact type, orders them by priority, and runs each one as an
//! independent task on an elastic worker pool.
//!
//! ## Features
//!
//! - **Exact-Type Routing**: handlers are keyed by the concrete event type
//! - **Priority Submission**: handlers are started `First` to `Last`
//! - **Failure Isolation**: a failing or panicking handler is reported to a
//!   [`FailureSink`] and never affects its siblings or the caller
//! - **Completion Handles**: optionally wait for, or `.await`, every handler
//!   of one fire call
//! - **Graceful Shutdown**: stop admission and drain with a deadline
//!
//! ## Quick Start
//!
//! ```rust
//! use firebus::{listener, Dispatcher, Event};
//! use std::sync::Arc;
//!
//! #[derive(Event, Debug)]
//! struct Ping {
//!     sequence: u64,
//! }
//!
//! struct Logger;
//!
//! #[listener]
//! impl Logger {
//!     #[subscribe(priority = Early)]
//!     pub fn first(&self, event: &Ping) {
//!         println!("early {}", event.sequence);
//!     }
//!
//!     #[subscribe(priority = Late)]
//!     pub fn second(&self, event: &Ping) {
//!         println!("late {}", event.sequence);
//!     }
//! }
//!
//! let dispatcher = Dispatcher::new().unwrap();
//! let logger = Arc::new(Logger);
//! dispatcher.register(&logger);
//!
//! let ping = dispatcher.fire(Ping { sequence: 1 }).unwrap().wait().unwrap();
//! assert_eq!(ping.sequence, 1);
//!
//! assert_eq!(dispatcher.unregister(&logger), 2);
//! assert!(dispatcher.shutdown_default());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Lets the derive output's `::firebus` paths resolve inside this crate.
extern crate self as firebus;

#[cfg(feature = "derive")]
pub use firebus_derive::{listener, Event};

pub mod cancellable;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod executor;
pub mod handler;
pub mod listener;
pub mod metrics;
pub mod priority;
pub mod registry;
pub mod sink;
pub mod testing;

pub use cancellable::{CancelFlag, Cancellable};
pub use completion::Completion;
pub use config::{DispatcherConfig, ExecutorConfig};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::*;
pub use event::Event;
pub use executor::TaskExecutor;
pub use handler::{HandlerDescriptor, HandlerOutcome, ListenerId};
pub use listener::{Binder, Listener};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use priority::{ParsePostOrderError, PostOrder};
pub use registry::HandlerRegistry;
pub use sink::{FailureSink, HandlerFailure, TracingSink};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{DispatchError, EventValidationError, HandlerError};
    pub use crate::{
        Binder, Cancellable, Completion, Dispatcher, DispatcherBuilder, Event, FailureSink,
        HandlerFailure, Listener, ListenerId, PostOrder,
    };

    #[cfg(feature = "derive")]
    pub use crate::listener;
}

/// Current version of firebus
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
