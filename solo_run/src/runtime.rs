//! The runtime driving tasks and the reactor on a single thread.
//!
//! There are no worker threads and no background event loop: the thread that calls
//! [`Runtime::block_on`] alternates between polling ready tasks and blocking in the reactor
//! until a watcher fires. "Concurrency" is the interleaving of suspended tasks, nothing more.

use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::trace;
use metrics::{counter, gauge};
use mio::{Events, Poll};
use thiserror::Error;

use crate::reactor::{self, Reactor};
use crate::task::{JoinError, JoinHandle, JoinState, RunQueue, Task, panic_message};

/// Error surfaced by [`Runtime::block_on`] when the main task cannot be driven to completion.
#[derive(Debug, Error)]
pub enum RunError {
    /// The OS event backend could not be set up or failed while polling.
    #[error("event backend failure: {0}")]
    Io(#[from] io::Error),
    /// The main task did not run to completion.
    #[error(transparent)]
    Join(#[from] JoinError),
    /// No watcher remains armed and no task is runnable, but the main task has not completed.
    /// Returned instead of blocking forever on a poll that nothing can wake.
    #[error("no watcher remains armed but the main task has not completed")]
    Stalled,
}

/// A cloneable handle to a runtime, used to spawn tasks and construct awaitables.
///
/// Every component that can suspend takes the runtime context explicitly, through this handle,
/// at construction. There is no process-wide loop: independent runtimes (one per test, say)
/// coexist without touching each other.
#[derive(Clone)]
pub struct Handle {
    reactor: Arc<Reactor>,
    queue: Arc<RunQueue>,
}

impl Handle {
    pub(crate) fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Spawns a future as a new task and returns a handle to its completion.
    ///
    /// The task starts eagerly: its body runs on the calling thread, right now, up to its
    /// first suspension point. A body that never suspends is already finished when `spawn`
    /// returns, without any reactor involvement.
    ///
    /// A panic inside the task is caught and reported through the returned [`JoinHandle`] as
    /// [`JoinError::Panicked`]; it does not take the process down.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let done = handle.spawn(async move {
    ///     timer.wait().await;
    ///     "finished"
    /// });
    /// let outcome = done.await;
    /// ```
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // Track total throughput of the system
        counter!("solo_run_tasks_spawned_total").increment(1);
        gauge!("solo_run_tasks_pending_current").increment(1.0);

        let state = JoinState::new();
        let completion = state.clone();
        let task = Task::new(Box::pin(async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            completion.complete(result.map_err(|payload| JoinError::Panicked(panic_message(payload))));
        }));

        // Eager start: run the body inline until its first suspension point.
        if let Some(future) = task.try_take() {
            let waker = Task::get_or_init_waker(&task, &self.queue);
            task.poll(future, waker);
        }

        JoinHandle { state }
    }
}

/// The runtime combining the task scheduler and the reactor on one thread.
pub struct Runtime {
    reactor: Arc<Reactor>,
    queue: Arc<RunQueue>,
    poll: Poll,
    events: Events,
}

impl Runtime {
    /// Creates a new runtime.
    ///
    /// # Arguments
    ///
    /// * `show_metrics` - If `true`, starts a Prometheus metrics exporter on port 9000
    ///
    /// # Returns
    ///
    /// Returns `Ok(Runtime)` on success, or an IO error if the event backend cannot be set up.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut runtime = Runtime::new(false)?;
    /// let handle = runtime.handle();
    /// runtime.block_on(async move {
    ///     // Your suspendable code here
    /// })?;
    /// ```
    pub fn new(show_metrics: bool) -> io::Result<Self> {
        // Initialize metrics page
        if show_metrics {
            let port = 9000;
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], port))
                .install()
                .map_err(io::Error::other)?;
            println!("[solo_run] metrics enabled at http://localhost:{port}/metrics");
        }

        let (reactor, poll) = Reactor::new()?;

        Ok(Self {
            reactor,
            queue: Arc::new(RunQueue::new()),
            poll,
            events: Events::with_capacity(1024),
        })
    }

    /// Returns a handle for spawning tasks and constructing awaitables against this runtime.
    pub fn handle(&self) -> Handle {
        Handle {
            reactor: self.reactor.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Spawns a future onto this runtime without awaiting it here.
    ///
    /// Equivalent to `runtime.handle().spawn(future)`; the task is driven to completion by a
    /// subsequent [`Runtime::block_on`].
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }

    /// Drives `future`, and every task spawned from it, until the runtime is quiescent.
    ///
    /// The main task starts eagerly. The loop then alternates between polling every runnable
    /// task and blocking in the reactor, and exits once no task is runnable and no watcher of
    /// either kind remains armed; detached tasks still in flight keep the loop alive past the
    /// main task's completion.
    ///
    /// # Errors
    ///
    /// * [`RunError::Io`] if the event backend fails
    /// * [`RunError::Join`] if the main task panicked
    /// * [`RunError::Stalled`] if the runtime went quiescent with the main task unfinished
    pub fn block_on<F>(&mut self, future: F) -> Result<F::Output, RunError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let main_task = self.handle().spawn(future);

        loop {
            self.drain_ready();

            if self.queue.is_empty() && self.reactor.is_idle() {
                break;
            }

            reactor::turn(&mut self.poll, &mut self.events, &self.reactor)?;
        }

        match main_task.try_take_output() {
            Some(Ok(output)) => Ok(output),
            Some(Err(err)) => Err(RunError::Join(err)),
            None => Err(RunError::Stalled),
        }
    }

    /// Polls every task currently in the run queue, including tasks woken mid-drain.
    fn drain_ready(&self) {
        while let Some(task) = self.queue.pop() {
            trace!("polling task {}", task.id);
            if let Some(future) = task.try_take() {
                let waker = Task::get_or_init_waker(&task, &self.queue);
                task.poll(future, waker);
            }
        }
    }
}
