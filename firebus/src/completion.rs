//! Completion handle for a single fire call.

use crate::error::{DispatchError, DispatchResult};
use crate::event::Event;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves once every handler scheduled by one `fire` call has finished.
///
/// Yields the fired event instance on success. Handler failures do not fail
/// a completion; they go to the dispatcher's failure sink. The completion
/// fails with [`DispatchError::Aggregation`] only when the dispatch
/// bookkeeping itself faults.
///
/// A `Completion` can be awaited from async code or waited on with
/// [`wait`](Self::wait) from a plain thread. Dropping it does not cancel the
/// handlers.
pub struct Completion<E> {
    state: State<E>,
}

enum State<E> {
    Ready(Option<DispatchResult<Arc<E>>>),
    Pending(oneshot::Receiver<DispatchResult<Arc<E>>>),
}

impl<E: Event> Completion<E> {
    pub(crate) fn ready(event: Arc<E>) -> Self {
        Self {
            state: State::Ready(Some(Ok(event))),
        }
    }

    pub(crate) fn channel() -> (oneshot::Sender<DispatchResult<Arc<E>>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: State::Pending(rx),
            },
        )
    }

    /// Blocks the current thread until every handler has finished.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; `.await`
    /// the completion there instead.
    pub fn wait(self) -> DispatchResult<Arc<E>> {
        match self.state {
            State::Ready(result) => result.unwrap_or_else(|| Err(polled_twice())),
            State::Pending(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(dropped())),
        }
    }
}

impl<E: Event> Future for Completion<E> {
    type Output = DispatchResult<Arc<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(polled_twice()))),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(dropped()))),
        }
    }
}

impl<E> fmt::Debug for Completion<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Ready(_) => "ready",
            State::Pending(_) => "pending",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

fn dropped() -> DispatchError {
    DispatchError::aggregation("completion dropped before all handlers were joined")
}

fn polled_twice() -> DispatchError {
    DispatchError::aggregation("completion polled after it resolved")
}
