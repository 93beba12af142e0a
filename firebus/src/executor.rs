//! Task executor.
//!
//! Handler invocations run on tokio's blocking pool: workers are spawned on
//! demand up to a ceiling and retired after an idle period, so a burst of
//! handlers, or a few handlers that block, never queue behind a fixed-size
//! pool. The executor tracks in-flight tasks so that [`TaskExecutor::shutdown`]
//! can stop admission and wait for a drain with a deadline.
//!
//! ```text
//! submit_all([t1, t2, t3])
//!     │  admission lock: closed? → ShutDown
//!     │                  in_flight += 3
//!     ├──► spawn_blocking(t1) ──► guard drop → in_flight -= 1
//!     ├──► spawn_blocking(t2) ──► guard drop → in_flight -= 1
//!     └──► spawn_blocking(t3) ──► guard drop → in_flight -= 1 → notify drained
//! ```

use crate::config::ExecutorConfig;
use crate::error::{DispatchError, DispatchResult};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Admission {
    closed: bool,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct DrainState {
    admission: Mutex<Admission>,
    drained: Condvar,
    notify: Notify,
}

impl DrainState {
    fn lock(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    async fn wait(&self) {
        loop {
            if self.in_flight() == 0 {
                break;
            }

            let notified = self.notify.notified();

            if self.in_flight() == 0 {
                break;
            }

            notified.await;
        }
    }
}

/// Decrements the in-flight count when the task it travels with is dropped,
/// whether the task ran, panicked, or was discarded by a stopping runtime.
struct TaskGuard(Arc<DrainState>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut admission = self.0.lock();
        admission.in_flight -= 1;
        if admission.in_flight == 0 {
            self.0.drained.notify_all();
            self.0.notify.notify_waiters();
        }
    }
}

enum ExecutorRuntime {
    Owned(Option<Runtime>, Handle),
    Shared(Handle),
}

impl ExecutorRuntime {
    fn handle(&self) -> &Handle {
        match self {
            ExecutorRuntime::Owned(_, handle) | ExecutorRuntime::Shared(handle) => handle,
        }
    }
}

/// Elastic worker pool for handler invocations.
pub struct TaskExecutor {
    runtime: ExecutorRuntime,
    drain: Arc<DrainState>,
}

impl TaskExecutor {
    /// Creates an executor according to `config`.
    ///
    /// Runs on the current tokio runtime when `use_ambient_runtime` is set and
    /// one exists; otherwise builds and owns a runtime whose blocking pool is
    /// sized by the config.
    pub fn new(config: &ExecutorConfig) -> DispatchResult<Self> {
        if config.use_ambient_runtime {
            if let Ok(handle) = Handle::try_current() {
                tracing::debug!("executor attached to ambient tokio runtime");
                return Ok(Self::with_handle(handle));
            }
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_worker_threads.max(1))
            .thread_keep_alive(config.idle_timeout)
            .thread_name(config.thread_name.clone())
            .build()
            .map_err(|error| {
                DispatchError::configuration(format!("failed to build executor runtime: {error}"))
            })?;

        tracing::debug!(
            max_worker_threads = config.max_worker_threads,
            idle_timeout = ?config.idle_timeout,
            "executor started owned runtime"
        );

        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: ExecutorRuntime::Owned(Some(runtime), handle),
            drain: Arc::new(DrainState::default()),
        })
    }

    /// Creates an executor that runs tasks on the runtime behind `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: ExecutorRuntime::Shared(handle),
            drain: Arc::new(DrainState::default()),
        }
    }

    /// Admits a batch of tasks and starts each on the worker pool, in order.
    ///
    /// Either the whole batch is admitted or, after shutdown, none of it is.
    pub fn submit_all<I, F>(&self, tasks: I) -> DispatchResult<Vec<JoinHandle<()>>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: ExactSizeIterator,
        F: FnOnce() + Send + 'static,
    {
        let tasks = tasks.into_iter();

        {
            let mut admission = self.drain.lock();
            if admission.closed {
                return Err(DispatchError::ShutDown);
            }
            admission.in_flight += tasks.len();
        }

        let handle = self.runtime.handle();
        Ok(tasks
            .map(|task| {
                let guard = TaskGuard(Arc::clone(&self.drain));
                handle.spawn_blocking(move || {
                    let _guard = guard;
                    task();
                })
            })
            .collect())
    }

    /// Spawns bookkeeping work on the executor's runtime.
    ///
    /// Such work is not counted as in flight and is not admission-checked.
    pub(crate) fn spawn_async<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.handle().spawn(future)
    }

    /// Returns the number of admitted tasks that have not finished.
    pub fn in_flight(&self) -> usize {
        self.drain.in_flight()
    }

    /// Returns whether the executor has stopped accepting tasks.
    pub fn is_closed(&self) -> bool {
        self.drain.lock().closed
    }

    /// Stops accepting new tasks. Already admitted tasks keep running.
    pub fn close(&self) {
        self.drain.lock().closed = true;
    }

    /// Stops admission and waits up to `timeout` for in-flight tasks.
    ///
    /// Returns `true` when every task finished in time and `false` when at
    /// least one was still running at the deadline. Tasks still running are
    /// abandoned, not interrupted. Blocks the calling thread; use
    /// [`shutdown_async`](Self::shutdown_async) from async code.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        // A deadline past what `Instant` can represent means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut admission = self.drain.lock();
        admission.closed = true;

        while admission.in_flight > 0 {
            let Some(deadline) = deadline else {
                admission = self
                    .drain
                    .drained
                    .wait(admission)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    in_flight = admission.in_flight,
                    ?timeout,
                    "executor shutdown timed out with tasks still running"
                );
                return false;
            }
            admission = self
                .drain
                .drained
                .wait_timeout(admission, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        tracing::debug!("executor drained");
        true
    }

    /// Async variant of [`shutdown`](Self::shutdown).
    pub async fn shutdown_async(&self, timeout: Duration) -> bool {
        self.close();

        let drained = tokio::time::timeout(timeout, self.drain.wait())
            .await
            .is_ok();
        if drained {
            tracing::debug!("executor drained");
        } else {
            tracing::warn!(
                in_flight = self.in_flight(),
                ?timeout,
                "executor shutdown timed out with tasks still running"
            );
        }
        drained
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if let ExecutorRuntime::Owned(runtime, _) = &mut self.runtime {
            if let Some(runtime) = runtime.take() {
                // Never blocks, so dropping inside an async context is fine.
                runtime.shutdown_background();
            }
        }
    }
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owned = matches!(self.runtime, ExecutorRuntime::Owned(..));
        f.debug_struct("TaskExecutor")
            .field("owned_runtime", &owned)
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn owned(max_worker_threads: usize) -> TaskExecutor {
        TaskExecutor::new(&ExecutorConfig {
            max_worker_threads,
            use_ambient_runtime: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_tasks_run_and_drain() {
        let executor = owned(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        executor.submit_all(tasks).unwrap();

        assert!(executor.shutdown(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn test_submit_after_close_is_rejected() {
        let executor = owned(1);
        executor.close();

        let result = executor.submit_all(vec![|| {}]);
        assert!(matches!(result, Err(DispatchError::ShutDown)));
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn test_single_worker_runs_in_submission_order() {
        let executor = owned(1);
        let (tx, rx) = mpsc::channel();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let tx = tx.clone();
                move || tx.send(i).unwrap()
            })
            .collect();
        executor.submit_all(tasks).unwrap();
        assert!(executor.shutdown(Duration::from_secs(5)));

        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_times_out_on_blocked_tasks() {
        let executor = owned(8);
        let tasks: Vec<_> = (0..5)
            .map(|_| || thread::sleep(Duration::from_millis(600)))
            .collect();
        executor.submit_all(tasks).unwrap();

        assert!(!executor.shutdown(Duration::from_millis(100)));
        assert!(executor.is_closed());
        assert!(executor.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_panicking_task_still_drains() {
        let executor = owned(2);
        let handles = executor
            .submit_all(vec![|| panic!("task fault")])
            .unwrap();

        assert!(executor.shutdown(Duration::from_secs(5)));
        assert_eq!(executor.in_flight(), 0);
        drop(handles);
    }

    #[test]
    fn test_shutdown_with_unbounded_timeout_waits_for_drain() {
        let executor = owned(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let task_counter = Arc::clone(&counter);
        executor
            .submit_all(vec![move || {
                thread::sleep(Duration::from_millis(50));
                task_counter.fetch_add(1, Ordering::SeqCst);
            }])
            .unwrap();

        assert!(executor.shutdown(Duration::MAX));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_without_tasks_is_immediate() {
        let executor = owned(1);
        assert!(executor.shutdown(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_ambient_runtime_and_async_shutdown() {
        let executor = TaskExecutor::new(&ExecutorConfig::default()).unwrap();
        assert!(format!("{executor:?}").contains("owned_runtime: false"));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handles = executor
            .submit_all(vec![move || {
                thread::sleep(Duration::from_millis(50));
                tx.send(()).unwrap();
            }])
            .unwrap();

        assert!(executor.shutdown_async(Duration::from_secs(5)).await);
        rx.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_async_shutdown_times_out() {
        let executor = TaskExecutor::new(&ExecutorConfig::default()).unwrap();
        executor
            .submit_all(vec![|| thread::sleep(Duration::from_millis(500))])
            .unwrap();

        assert!(!executor.shutdown_async(Duration::from_millis(50)).await);
        assert!(executor.shutdown_async(Duration::from_secs(5)).await);
    }
}
