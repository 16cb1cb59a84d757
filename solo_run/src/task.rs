use crossbeam_queue::SegQueue;
use futures::future::BoxFuture;
use metrics::gauge;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll, Waker};
use thiserror::Error;

pub(crate) static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(0);

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const COMPLETED: u8 = 2;

/// A pinned, heap-allocated future that produces no output.
///
/// `Pin` guarantees that the future's data will not be moved in memory, which is essential for
/// futures that contain self-referential data. While the `Box` container itself can be moved,
/// the data within it remains at a stable heap address.
pub type TaskFuture = BoxFuture<'static, ()>;

/// The queue of tasks that are ready to be polled.
///
/// Wakers push resumed tasks here; the runtime drains it before blocking in the reactor again.
pub(crate) type RunQueue = SegQueue<Arc<Task>>;

/// Represents a suspendable task managed by the runtime.
///
/// A `Task` wraps a future and tracks its execution state. The future lives in a slot that is
/// taken out for the duration of a poll and put back if the task suspends again.
pub struct Task {
    /// Unique identifier for this task.
    pub id: usize,
    /// Current execution state of the task (idle, polling, or completed).
    state: AtomicU8,
    /// Slot holding the future between polls; empty while polling and after completion.
    future: Mutex<Option<TaskFuture>>,
    /// Waker for this task, built on first use and reused for every subsequent suspension.
    waker: OnceLock<Waker>,
}

impl Task {
    /// Creates a new task from a future, wrapped in an `Arc` for the run queue and its waker.
    pub(crate) fn new(future: TaskFuture) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(IDLE),
            future: Mutex::new(Some(future)),
            waker: OnceLock::new(),
        })
    }

    /// Takes the future out of its slot, or `None` if the task is completed or mid-poll.
    ///
    /// A `None` here is not an error: a task woken twice ends up in the run queue twice, and
    /// the second entry finds the slot empty or the task already complete.
    pub(crate) fn try_take(&self) -> Option<TaskFuture> {
        self.future.lock().unwrap().take()
    }

    /// Returns the task's waker, building it on first use.
    pub(crate) fn get_or_init_waker(task: &Arc<Self>, queue: &Arc<RunQueue>) -> Waker {
        task.waker
            .get_or_init(|| crate::waker::task_waker(task.clone(), queue.clone()))
            .clone()
    }

    /// Polls the task's future once, re-storing it on `Pending` and retiring it on `Ready`.
    pub(crate) fn poll(&self, mut future: TaskFuture, waker: Waker) {
        self.state.store(POLLING, Ordering::Release);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.state.store(COMPLETED, Ordering::Release);
                gauge!("solo_run_tasks_pending_current").decrement(1.0);
            }
            Poll::Pending => {
                *self.future.lock().unwrap() = Some(future);
                self.state.store(IDLE, Ordering::Release);
            }
        }
    }
}

/// Error produced when a task did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The task's body panicked. The payload message is preserved; the process is not.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct JoinInner<T> {
    result: Option<Result<T, JoinError>>,
    waker: Option<Waker>,
}

/// Shared completion slot between a task and the handle awaiting it.
pub(crate) struct JoinState<T> {
    inner: Mutex<JoinInner<T>>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(JoinInner {
                result: None,
                waker: None,
            }),
        })
    }

    /// Records the task's outcome and wakes the awaiting task, if any.
    pub(crate) fn complete(&self, result: Result<T, JoinError>) {
        let waker = {
            let mut inner = self.inner.lock().unwrap();
            inner.result = Some(result);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// An owned handle to a spawned task's completion.
///
/// Awaiting the handle suspends the enclosing task until the spawned task finishes, and yields
/// the task's output or the fault that ended it. A task that already completed resolves the
/// handle immediately, without a trip through the reactor.
pub struct JoinHandle<T> {
    pub(crate) state: Arc<JoinState<T>>,
}

impl<T> JoinHandle<T> {
    /// Whether the task has run to its end (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.state.inner.lock().unwrap().result.is_some()
    }

    /// Takes the recorded outcome without suspending, if the task has finished.
    pub(crate) fn try_take_output(&self) -> Option<Result<T, JoinError>> {
        self.state.inner.lock().unwrap().result.take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.state.inner.lock().unwrap();
        match inner.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
