//! The dispatcher.
//!
//! [`Dispatcher`] ties the pieces together: it binds listeners into the
//! [`HandlerRegistry`], and on every `fire` it snapshots the handlers for the
//! event's exact type, orders them by [`PostOrder`], and submits one task per
//! handler to the [`TaskExecutor`]. Each task catches its handler's failure and
//! reports it to the [`FailureSink`]; nothing a handler does reaches the caller.

use crate::completion::Completion;
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::event::Event;
use crate::executor::TaskExecutor;
use crate::handler::{HandlerDescriptor, HandlerOutcome, ListenerId};
use crate::listener::{self, Listener};
use crate::metrics::DispatchMetrics;
use crate::priority::PostOrder;
use crate::registry::HandlerRegistry;
use crate::sink::{FailureSink, HandlerFailure, TracingSink};
use futures::future::join_all;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// In-process publish/subscribe dispatcher.
///
/// `Dispatcher` is `Send + Sync`; share it behind an `Arc` to fire from many
/// threads.
///
/// # Examples
///
/// ```rust
/// use firebus::{Dispatcher, Event};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// #[derive(Event, Debug)]
/// struct Ping;
///
/// let dispatcher = Dispatcher::new().unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&hits);
/// dispatcher.on(move |_: &Ping| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// dispatcher.fire(Ping).unwrap().wait().unwrap();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// assert!(dispatcher.shutdown_default());
/// ```
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: HandlerRegistry,
    executor: TaskExecutor,
    sink: Arc<dyn FailureSink>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Creates a dispatcher with the default configuration and a
    /// [`TracingSink`].
    pub fn new() -> DispatchResult<Self> {
        Self::builder().build()
    }

    /// Creates a [`DispatcherBuilder`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use firebus::{Dispatcher, HandlerFailure, PostOrder};
    /// use std::time::Duration;
    ///
    /// let dispatcher = Dispatcher::builder()
    ///     .with_default_priority(PostOrder::Late)
    ///     .with_max_worker_threads(16)
    ///     .with_shutdown_timeout(Duration::from_secs(2))
    ///     .with_sink(|failure: &HandlerFailure| eprintln!("{failure}"))
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(dispatcher.config().default_priority, PostOrder::Late);
    /// ```
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Registers every handler `listener` declares.
    ///
    /// Returns the listener's identity. Registering the same instance twice
    /// registers its handlers twice.
    pub fn register<L: Listener>(&self, listener: &Arc<L>) -> ListenerId {
        let id = ListenerId::of(listener);
        let added = self.registry.register_all(listener::bind(listener));

        tracing::debug!(
            listener = %id,
            listener_name = std::any::type_name::<L>(),
            handlers = added,
            "registered listener"
        );
        id
    }

    /// Registers a pre-bound handler list under `owner`.
    ///
    /// Returns the number of handlers added. Unlike [`register`](Self::register),
    /// this does not keep any listener alive; if `owner` came from
    /// [`ListenerId::of`] and that allocation is freed, the id may be reused
    /// by another listener and unregistering either removes both.
    pub fn register_handlers<I>(&self, owner: ListenerId, handlers: I) -> usize
    where
        I: IntoIterator<Item = HandlerDescriptor>,
    {
        let added = self
            .registry
            .register_all(handlers.into_iter().map(|handler| handler.with_owner(owner)));

        tracing::debug!(listener = %owner, handlers = added, "registered handlers");
        added
    }

    /// Registers a single closure handler for events of type `E` under `owner`.
    pub fn subscribe<E, R, F>(&self, owner: ListenerId, priority: PostOrder, handler: F) -> ListenerId
    where
        E: Event,
        R: HandlerOutcome,
        F: Fn(&E) -> R + Send + Sync + 'static,
    {
        self.registry
            .register(HandlerDescriptor::new(owner, priority, handler));

        tracing::debug!(
            listener = %owner,
            event = E::event_type_name(),
            %priority,
            "subscribed handler"
        );
        owner
    }

    /// Registers a closure handler at the configured default priority.
    ///
    /// The handler gets a fresh anonymous owner; keep the returned id to
    /// unregister it.
    pub fn on<E, R, F>(&self, handler: F) -> ListenerId
    where
        E: Event,
        R: HandlerOutcome,
        F: Fn(&E) -> R + Send + Sync + 'static,
    {
        self.subscribe(ListenerId::anonymous(), self.config.default_priority, handler)
    }

    /// Removes every handler of `listener`, across all event types.
    ///
    /// Returns the number of handlers removed; zero when none were registered.
    pub fn unregister<L: ?Sized>(&self, listener: &Arc<L>) -> usize {
        self.unregister_id(ListenerId::of(listener))
    }

    /// Removes every handler owned by `id`.
    pub fn unregister_id(&self, id: ListenerId) -> usize {
        let removed = self.registry.unregister(id);
        tracing::debug!(listener = %id, handlers = removed, "unregistered listener");
        removed
    }

    /// Fires `event` and returns a handle that resolves when every handler
    /// scheduled for it has finished.
    ///
    /// Returns synchronously with [`DispatchError::ShutDown`] after shutdown
    /// and with [`DispatchError::InvalidArgument`] when validation is enabled
    /// and the event is invalid. In both cases no handler runs.
    ///
    /// Handlers are submitted in priority order; they may finish in any
    /// order.
    pub fn fire<E: Event>(&self, event: E) -> DispatchResult<Completion<E>> {
        let (event, handles) = self.dispatch(event)?;
        if handles.is_empty() {
            return Ok(Completion::ready(event));
        }

        let (tx, completion) = Completion::channel();
        self.executor.spawn_async(async move {
            let faults: Vec<_> = join_all(handles)
                .await
                .into_iter()
                .filter_map(Result::err)
                .collect();

            let result = match faults.first() {
                None => Ok(event),
                Some(fault) => Err(DispatchError::aggregation(format!(
                    "{} of the handler tasks faulted: {fault}",
                    faults.len()
                ))),
            };
            // The caller may have dropped the completion.
            let _ = tx.send(result);
        });

        Ok(completion)
    }

    /// Fires `event` without tracking completion.
    ///
    /// Rejections are the same as for [`fire`](Self::fire). Handler failures
    /// are still reported to the sink.
    pub fn fire_and_forget<E: Event>(&self, event: E) -> DispatchResult<()> {
        self.dispatch(event).map(|_| ())
    }

    fn dispatch<E: Event>(&self, event: E) -> DispatchResult<(Arc<E>, Vec<JoinHandle<()>>)> {
        if self.executor.is_closed() {
            self.metrics.record_rejection();
            return Err(DispatchError::ShutDown);
        }

        if self.config.validate_events {
            if let Err(error) = event.validate() {
                self.metrics.record_rejection();
                return Err(error.into());
            }
        }

        let mut handlers = self.registry.snapshot(TypeId::of::<E>());
        // Stable: equal priorities keep registration order.
        handlers.sort_by_key(|handler| handler.priority());

        tracing::trace!(
            event = %event.log_description(),
            handlers = handlers.len(),
            "firing event"
        );

        let event = Arc::new(event);
        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|descriptor| {
                tracing::trace!(
                    event = E::event_type_name(),
                    handler = descriptor.handler_name(),
                    priority = %descriptor.priority(),
                    "submitting handler"
                );

                let event = Arc::clone(&event);
                let sink = Arc::clone(&self.sink);
                let metrics = Arc::clone(&self.metrics);
                move || run_handler(&descriptor, &*event, &*sink, &metrics)
            })
            .collect();

        let submitted = tasks.len();
        let handles = self.executor.submit_all(tasks).map_err(|error| {
            self.metrics.record_rejection();
            error
        })?;
        self.metrics.record_fire(submitted);

        Ok((event, handles))
    }

    /// Stops accepting events and waits up to `timeout` for running handlers.
    ///
    /// Returns `true` when every handler finished in time. Handlers still
    /// running at the deadline are abandoned, not interrupted. Calling it
    /// again reports the current drain state.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        tracing::debug!(?timeout, "shutting down dispatcher");
        self.executor.shutdown(timeout)
    }

    /// Shuts down with the configured `shutdown_timeout`.
    pub fn shutdown_default(&self) -> bool {
        self.shutdown(self.config.shutdown_timeout)
    }

    /// Async variant of [`shutdown`](Self::shutdown).
    pub async fn shutdown_async(&self, timeout: Duration) -> bool {
        tracing::debug!(?timeout, "shutting down dispatcher");
        self.executor.shutdown_async(timeout).await
    }

    /// Returns whether the dispatcher has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.executor.is_closed()
    }

    /// Returns the number of handlers registered for events of type `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.registry.handler_count(TypeId::of::<E>())
    }

    /// Returns the number of handlers across all event types.
    pub fn total_handler_count(&self) -> usize {
        self.registry.total_handler_count()
    }

    /// Returns whether `listener` has any registered handler.
    pub fn is_registered<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.registry.is_registered(ListenerId::of(listener))
    }

    /// Returns the dispatch counters.
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn run_handler(
    descriptor: &HandlerDescriptor,
    event: &(dyn Any + Send + Sync),
    sink: &dyn FailureSink,
    metrics: &DispatchMetrics,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| descriptor.invoke(event)))
        .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));

    if let Err(error) = outcome {
        metrics.record_failure();
        sink.handler_failed(&HandlerFailure::new(descriptor, error));
    }
}

/// Builder for [`Dispatcher`] instances.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    sink: Option<Arc<dyn FailureSink>>,
    runtime: Option<Handle>,
    #[cfg(feature = "metrics")]
    prometheus: Option<prometheus::Registry>,
}

impl DispatcherBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            sink: None,
            runtime: None,
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables event validation.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.config.validate_events = validate;
        self
    }

    /// Sets the priority used by [`Dispatcher::on`].
    pub fn with_default_priority(mut self, priority: PostOrder) -> Self {
        self.config.default_priority = priority;
        self
    }

    /// Sets the drain window used by [`Dispatcher::shutdown_default`].
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Sets the ceiling on concurrently running workers.
    ///
    /// Only applies when the dispatcher owns its runtime.
    pub fn with_max_worker_threads(mut self, max: usize) -> Self {
        self.config.executor.max_worker_threads = max;
        self
    }

    /// Sets how long an idle worker is kept.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.config.executor.idle_timeout = idle_timeout;
        self
    }

    /// Sets the worker thread name.
    pub fn with_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.executor.thread_name = name.into();
        self
    }

    /// Forces the dispatcher to build and own its runtime even when it is
    /// created inside one.
    pub fn with_owned_runtime(mut self) -> Self {
        self.config.executor.use_ambient_runtime = false;
        self
    }

    /// Runs handlers on the runtime behind `handle`.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Sets the sink that receives handler failures.
    pub fn with_sink<S: FailureSink>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Sets a sink that is shared with other owners.
    pub fn with_shared_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Exports the dispatch counters through `registry`.
    #[cfg(feature = "metrics")]
    pub fn with_prometheus_registry(mut self, registry: prometheus::Registry) -> Self {
        self.prometheus = Some(registry);
        self
    }

    /// Builds the dispatcher.
    ///
    /// Fails with [`DispatchError::Configuration`] when the runtime cannot be
    /// started or the metrics cannot be registered.
    pub fn build(self) -> DispatchResult<Dispatcher> {
        let executor = match self.runtime {
            Some(handle) => TaskExecutor::with_handle(handle),
            None => TaskExecutor::new(&self.config.executor)?,
        };

        #[cfg(feature = "metrics")]
        let metrics = match &self.prometheus {
            Some(registry) => DispatchMetrics::with_registry(registry).map_err(|error| {
                DispatchError::configuration(format!("failed to register metrics: {error}"))
            })?,
            None => DispatchMetrics::new(),
        };
        #[cfg(not(feature = "metrics"))]
        let metrics = DispatchMetrics::new();

        Ok(Dispatcher {
            config: self.config,
            registry: HandlerRegistry::new(),
            executor,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            metrics: Arc::new(metrics),
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("config", &self.config)
            .field("custom_sink", &self.sink.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventValidationError;
    use crate::testing::{CallRecorder, RecordingSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Ping(u32);

    impl Event for Ping {
        fn validate(&self) -> Result<(), EventValidationError> {
            if self.0 == 0 {
                return Err(EventValidationError::invalid_value("sequence", "0"));
            }
            Ok(())
        }
    }

    fn single_worker(sink: &RecordingSink) -> Dispatcher {
        Dispatcher::builder()
            .with_owned_runtime()
            .with_max_worker_threads(1)
            .with_sink(sink.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_fire_without_handlers_resolves_immediately() {
        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        let completion = dispatcher.fire(Ping(1)).unwrap();

        assert_eq!(completion.wait().unwrap().0, 1);
        assert_eq!(dispatcher.metrics().snapshot().events_fired, 1);
        assert_eq!(dispatcher.metrics().snapshot().handlers_submitted, 0);
    }

    #[test]
    fn test_handlers_submitted_in_priority_order() {
        let sink = RecordingSink::new();
        let dispatcher = single_worker(&sink);
        let calls = CallRecorder::new();

        for (label, priority) in [
            ("last", PostOrder::Last),
            ("normal", PostOrder::Normal),
            ("first", PostOrder::First),
            ("late", PostOrder::Late),
            ("early", PostOrder::Early),
        ] {
            let calls = calls.clone();
            dispatcher.subscribe(ListenerId::anonymous(), priority, move |_: &Ping| {
                calls.record(label)
            });
        }

        dispatcher.fire(Ping(1)).unwrap().wait().unwrap();
        assert_eq!(calls.calls(), ["first", "early", "normal", "late", "last"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let sink = RecordingSink::new();
        let dispatcher = single_worker(&sink);
        let calls = CallRecorder::new();

        for label in ["a", "b", "c", "d"] {
            let calls = calls.clone();
            dispatcher.on(move |_: &Ping| calls.record(label));
        }

        dispatcher.fire(Ping(1)).unwrap().wait().unwrap();
        assert_eq!(calls.calls(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_register_handlers_rebinds_owner() {
        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        let owner = ListenerId::anonymous();

        let handlers = vec![
            HandlerDescriptor::new(ListenerId::anonymous(), PostOrder::Early, |_: &Ping| {}),
            HandlerDescriptor::new(ListenerId::anonymous(), PostOrder::Late, |_: &Ping| {}),
        ];
        assert_eq!(dispatcher.register_handlers(owner, handlers), 2);
        assert_eq!(dispatcher.handler_count::<Ping>(), 2);
        assert_eq!(dispatcher.unregister_id(owner), 2);
        assert_eq!(dispatcher.total_handler_count(), 0);
    }

    #[test]
    fn test_failures_go_to_sink_only() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::builder()
            .with_owned_runtime()
            .with_sink(sink.clone())
            .build()
            .unwrap();
        let survivors = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(ListenerId::anonymous(), PostOrder::First, |_: &Ping| {
            Err::<(), _>("refused")
        });
        dispatcher.subscribe::<_, (), _>(ListenerId::anonymous(), PostOrder::Normal, |_: &Ping| {
            panic!("handler blew up")
        });
        let counter = Arc::clone(&survivors);
        dispatcher.subscribe(ListenerId::anonymous(), PostOrder::Last, move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(dispatcher.fire(Ping(1)).unwrap().wait().is_ok());
        assert_eq!(survivors.load(Ordering::SeqCst), 1);

        let mut messages: Vec<_> = sink.failures().into_iter().map(|f| f.message).collect();
        messages.sort();
        assert_eq!(
            messages,
            ["Handler failed: refused", "Handler panicked: handler blew up"]
        );
        assert_eq!(dispatcher.metrics().snapshot().handler_failures, 2);
    }

    #[test]
    fn test_panicking_sink_fails_completion() {
        let dispatcher = Dispatcher::builder()
            .with_owned_runtime()
            .with_sink(|_: &HandlerFailure| panic!("sink is broken"))
            .build()
            .unwrap();
        dispatcher.on(|_: &Ping| Err::<(), _>("refused"));

        let error = dispatcher.fire(Ping(1)).unwrap().wait().unwrap_err();
        assert!(matches!(error, DispatchError::Aggregation { .. }));
    }

    #[test]
    fn test_invalid_event_is_rejected_synchronously() {
        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.on(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let error = dispatcher.fire(Ping(0)).unwrap_err();
        assert!(matches!(error, DispatchError::InvalidArgument(_)));
        assert!(dispatcher.shutdown(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metrics().snapshot().fires_rejected, 1);
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let dispatcher = Dispatcher::builder()
            .with_owned_runtime()
            .with_validation(false)
            .build()
            .unwrap();

        assert!(dispatcher.fire(Ping(0)).unwrap().wait().is_ok());
    }

    #[test]
    fn test_fire_after_shutdown_is_rejected() {
        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        assert!(dispatcher.shutdown(Duration::from_secs(1)));
        assert!(dispatcher.is_shut_down());

        assert!(matches!(dispatcher.fire(Ping(1)), Err(DispatchError::ShutDown)));
        assert!(matches!(
            dispatcher.fire_and_forget(Ping(1)),
            Err(DispatchError::ShutDown)
        ));
        // Repeated shutdown reports the drained state again.
        assert!(dispatcher.shutdown(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_ambient_runtime_fire_and_await() {
        let dispatcher = Dispatcher::new().unwrap();
        let calls = CallRecorder::new();
        let recorder = calls.clone();
        dispatcher.on(move |ping: &Ping| recorder.record(format!("ping {}", ping.0)));

        let event = dispatcher.fire(Ping(9)).unwrap().await.unwrap();
        assert_eq!(event.0, 9);
        assert_eq!(calls.calls(), ["ping 9"]);
        assert!(dispatcher.shutdown_async(Duration::from_secs(1)).await);
    }

    #[test]
    fn test_fire_logs_event_description() {
        #[derive(Clone, Default)]
        struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        #[derive(Debug)]
        struct Login {
            user: &'static str,
        }

        impl Event for Login {
            fn log_description(&self) -> String {
                format!("login of {}", self.user)
            }
        }

        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            dispatcher.fire(Login { user: "ada" }).unwrap().wait().unwrap();
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("firing event"), "{output}");
        assert!(output.contains("login of ada"), "{output}");
    }

    #[test]
    fn test_debug_output() {
        let dispatcher = Dispatcher::builder().with_owned_runtime().build().unwrap();
        let rendered = format!("{dispatcher:?}");
        assert!(rendered.starts_with("Dispatcher"));
        assert!(format!("{:?}", Dispatcher::builder()).contains("custom_sink: false"));
    }
}
