//! Per-thread scheduler context and the task-facing free functions

use crate::scheduler::join::JoinHandle;
use crate::scheduler::scheduler::{Handle, Shared};
use crate::scheduler::task::{Priority, Task, TaskId};
use crossbeam_deque::Worker as CWorker;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// State owned by a worker thread
pub(crate) struct WorkerContext {
    /// Worker ID
    pub(crate) id: usize,
    /// Scheduler the worker belongs to
    pub(crate) shared: Arc<Shared>,
    /// Local LIFO deque (not Send, lives on this thread only)
    pub(crate) local: CWorker<Arc<Task>>,
}

thread_local! {
    static WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

pub(crate) fn set_worker(context: WorkerContext) {
    WORKER.with(|worker| *worker.borrow_mut() = Some(context));
}

pub(crate) fn take_worker() -> Option<WorkerContext> {
    WORKER.with(|worker| worker.borrow_mut().take())
}

/// Scheduler of the worker running on this thread
pub(crate) fn current_shared() -> Option<Arc<Shared>> {
    WORKER.with(|worker| worker.borrow().as_ref().map(|ctx| ctx.shared.clone()))
}

/// Push onto this thread's local deque if it is a worker of `shared`
pub(crate) fn push_local(shared: &Arc<Shared>, task: Arc<Task>) -> Result<(), Arc<Task>> {
    WORKER.with(|worker| match worker.try_borrow() {
        Ok(guard) => match guard.as_ref() {
            Some(ctx) if Arc::ptr_eq(&ctx.shared, shared) => {
                ctx.local.push(task);
                Ok(())
            }
            _ => Err(task),
        },
        Err(_) => Err(task),
    })
}

pub(crate) fn pop_local() -> Option<Arc<Task>> {
    WORKER.with(|worker| worker.borrow().as_ref().and_then(|ctx| ctx.local.pop()))
}

/// Move this worker's local tasks to the global injector
pub(crate) fn drain_local(shared: &Shared) -> usize {
    WORKER.with(|worker| {
        let guard = worker.borrow();
        let mut moved = 0;
        if let Some(ctx) = guard.as_ref() {
            while let Some(task) = ctx.local.pop() {
                shared.reinject(task);
                moved += 1;
            }
            if moved > 0 {
                tracing::trace!(worker = ctx.id, moved, "handed local queue to injector");
            }
        }
        moved
    })
}

/// Marks a task as current for the duration of a poll
pub(crate) struct CurrentTaskGuard {
    previous: Option<Arc<Task>>,
}

pub(crate) fn enter_task(task: &Arc<Task>) -> CurrentTaskGuard {
    let previous = CURRENT_TASK.with(|current| current.borrow_mut().replace(task.clone()));
    CurrentTaskGuard { previous }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|current| *current.borrow_mut() = previous);
    }
}

fn with_current_task<R>(f: impl FnOnce(&Task) -> R) -> Option<R> {
    CURRENT_TASK.with(|current| current.borrow().as_deref().map(f))
}

/// Whether the calling task has been cancelled
///
/// Always `false` outside a task.
pub fn is_cancelled() -> bool {
    with_current_task(|task| task.is_cancelled()).unwrap_or(false)
}

/// Priority of the calling task, if called from a task
pub fn current_priority() -> Option<Priority> {
    with_current_task(|task| task.priority())
}

/// ID of the calling task, if called from a task
pub fn current_task_id() -> Option<TaskId> {
    with_current_task(|task| task.id())
}

/// Spawn a task on the current scheduler (or the global one outside a worker)
///
/// The task inherits the caller's priority.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Handle::current_or_global().spawn(future)
}

/// Spawn a task with an explicit priority hint
pub fn spawn_with_priority<F>(priority: Priority, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Handle::current_or_global().spawn_with_priority(priority, future)
}

/// Run a blocking function on a dedicated thread
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Handle::current_or_global().spawn_blocking(f)
}

/// Run `f`, which may block the thread, without starving the scheduler
///
/// On a worker thread the worker is counted as blocked: its local queue is
/// handed to the injector and a compensating worker is started if too few
/// workers remain unblocked. Elsewhere `f` simply runs.
pub fn block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match current_shared() {
        Some(shared) => {
            let _blocking = BlockingSection::enter(shared);
            f()
        }
        None => f(),
    }
}

struct BlockingSection {
    shared: Arc<Shared>,
}

impl BlockingSection {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.enter_blocking();
        Self { shared }
    }
}

impl Drop for BlockingSection {
    fn drop(&mut self) {
        self.shared.exit_blocking();
    }
}

/// Cooperatively yield control back to the scheduler once
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
