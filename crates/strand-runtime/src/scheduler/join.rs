//! Join handles and task completion slots

use crate::scheduler::context;
use crate::scheduler::task::{Task, TaskId};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::future::{poll_fn, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Errors observed when joining a Task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The task's future panicked
    #[error("Task {0} panicked: {1}")]
    Panicked(TaskId, String),

    /// The task was dropped before it completed (scheduler shut down)
    #[error("Task {0} was dropped before completion")]
    Dropped(TaskId),
}

impl JoinError {
    /// Whether the task panicked
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panicked(..))
    }

    /// Re-raise the failure on the current thread
    pub fn resume(self) -> ! {
        match self {
            JoinError::Panicked(_, message) => panic::resume_unwind(Box::new(message)),
            JoinError::Dropped(id) => panic!("Task {} was dropped before completion", id),
        }
    }
}

/// Run a future, converting a panic during any poll into an `Err` with the payload
pub async fn catch_unwind<F: Future>(future: F) -> Result<F::Output, Box<dyn Any + Send>> {
    let mut future = Box::pin(future);
    poll_fn(move |cx| {
        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    })
    .await
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

struct JoinInner<T> {
    output: Option<Result<T, JoinError>>,
    waker: Option<Waker>,
    finished: bool,
}

/// Completion slot shared by a task and its JoinHandle
pub(crate) struct JoinState<T> {
    inner: Mutex<JoinInner<T>>,
    done: Condvar,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(JoinInner {
                output: None,
                waker: None,
                finished: false,
            }),
            done: Condvar::new(),
        })
    }

    fn complete(&self, result: Result<T, JoinError>) {
        let waker = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return;
            }
            inner.output = Some(result);
            inner.finished = true;
            inner.waker.take()
        };
        self.done.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn poll_output(&self, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>> {
        let mut inner = self.inner.lock();
        if let Some(output) = inner.output.take() {
            return Poll::Ready(output);
        }
        assert!(!inner.finished, "JoinHandle polled after completion");
        match &inner.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => inner.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }

    fn wait(&self) -> Result<T, JoinError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(output) = inner.output.take() {
                return output;
            }
            assert!(!inner.finished, "JoinHandle joined after completion");
            self.done.wait(&mut inner);
        }
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

/// Writer side of a [`JoinState`]
///
/// Dropping it without calling `complete` (the task was abandoned) records
/// [`JoinError::Dropped`].
pub(crate) struct Completion<T> {
    state: Option<Arc<JoinState<T>>>,
    id: TaskId,
}

impl<T> Completion<T> {
    pub(crate) fn new(state: Arc<JoinState<T>>, id: TaskId) -> Self {
        Self {
            state: Some(state),
            id,
        }
    }

    pub(crate) fn complete(mut self, result: Result<T, JoinError>) {
        if let Some(state) = self.state.take() {
            state.complete(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.complete(Err(JoinError::Dropped(self.id)));
        }
    }
}

/// Handle for awaiting a Task's result
///
/// Awaiting the handle yields the task's output, or a [`JoinError`] if it
/// panicked or was dropped. Dropping the handle detaches the task.
pub struct JoinHandle<T> {
    state: Arc<JoinState<T>>,
    task: Option<Arc<Task>>,
    id: TaskId,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(state: Arc<JoinState<T>>, task: Option<Arc<Task>>, id: TaskId) -> Self {
        Self { state, task, id }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Set the task's cooperative cancellation flag
    ///
    /// The task keeps running; it observes the flag through
    /// [`is_cancelled`](crate::is_cancelled) at its own suspension points.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.cancel();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.task.as_ref().is_some_and(|task| task.is_cancelled())
    }

    /// Whether the task has produced its output
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Block the current thread until the task finishes
    ///
    /// On a worker thread the worker is marked blocked for the duration so the
    /// pool can compensate.
    pub fn join(self) -> Result<T, JoinError> {
        context::block_in_place(|| self.state.wait())
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.poll_output(cx)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
