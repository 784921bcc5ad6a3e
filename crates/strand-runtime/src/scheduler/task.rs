//! Task structure and execution state

use crate::scheduler::context;
use crate::scheduler::scheduler::Shared;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling priority hint
///
/// Workers drain high-priority work first and low-priority work last. There is
/// no preemption and no starvation protection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Background work
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Latency-sensitive work
    High,
}

/// Lifecycle state of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Suspended, waiting for its waker
    Idle = 0,
    /// Sitting in a run queue
    Scheduled = 1,
    /// Being polled by a worker
    Running = 2,
    /// Woken while being polled; re-queued once the poll returns
    Notified = 3,
    /// Future finished (or was abandoned)
    Completed = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Idle,
            1 => TaskState::Scheduled,
            2 => TaskState::Running,
            3 => TaskState::Notified,
            _ => TaskState::Completed,
        }
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A lightweight green task
///
/// The future is type-erased; its output travels through the
/// [`JoinHandle`](crate::JoinHandle) completion slot captured inside it.
pub(crate) struct Task {
    /// Unique identifier
    id: TaskId,

    /// Scheduling hint
    priority: Priority,

    /// Current state (a `TaskState` discriminant)
    state: AtomicU8,

    /// Cooperative cancellation flag
    cancelled: AtomicBool,

    /// The future being driven (None once completed or abandoned)
    future: Mutex<Option<BoxFuture>>,

    /// Owning scheduler
    shared: Weak<Shared>,
}

impl Task {
    /// Create a new idle task
    pub(crate) fn new(
        id: TaskId,
        priority: Priority,
        future: BoxFuture,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            priority,
            state: AtomicU8::new(TaskState::Idle as u8),
            cancelled: AtomicBool::new(false),
            future: Mutex::new(Some(future)),
            shared,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Request cooperative cancellation and wake the task so it can observe it
    pub(crate) fn cancel(self: &Arc<Self>) {
        self.cancelled.store(true, Ordering::Release);
        self.schedule();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Put the task on a run queue unless it is already queued, running or done
    pub(crate) fn schedule(self: &Arc<Self>) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let next = match TaskState::from_u8(current) {
                TaskState::Idle => TaskState::Scheduled,
                TaskState::Running => TaskState::Notified,
                TaskState::Scheduled | TaskState::Notified | TaskState::Completed => return,
            };
            if self
                .state
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            if next == TaskState::Scheduled {
                match self.shared.upgrade() {
                    Some(shared) => shared.schedule(self.clone(), false),
                    None => self.abandon(),
                }
            }
            return;
        }
    }

    /// Poll the future once on the current worker
    pub(crate) fn run(self: Arc<Self>, shared: &Arc<Shared>) {
        self.state.store(TaskState::Running as u8, Ordering::Release);

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let poll = {
            let _current = context::enter_task(&self);
            let mut slot = self.future.lock();
            match slot.as_mut() {
                Some(future) => {
                    let poll = future.as_mut().poll(&mut cx);
                    if poll.is_ready() {
                        *slot = None;
                    }
                    poll
                }
                None => Poll::Ready(()),
            }
        };

        match poll {
            Poll::Ready(()) => {
                self.state.store(TaskState::Completed as u8, Ordering::Release);
                shared.record_completion();
            }
            Poll::Pending => {
                if self
                    .state
                    .compare_exchange(
                        TaskState::Running as u8,
                        TaskState::Idle as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    // Woken mid-poll: go to the back of the queue
                    self.state.store(TaskState::Scheduled as u8, Ordering::Release);
                    shared.schedule(self, true);
                }
            }
        }
    }

    /// Drop the future without running it to completion
    ///
    /// The join slot observes this as [`JoinError::Dropped`](crate::JoinError).
    pub(crate) fn abandon(&self) {
        self.state.store(TaskState::Completed as u8, Ordering::Release);
        let future = self.future.lock().take();
        drop(future);
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_task() -> Arc<Task> {
        Arc::new(Task::new(
            TaskId::new(),
            Priority::Normal,
            Box::pin(async {}),
            Weak::new(),
        ))
    }

    #[test]
    fn test_task_id_uniqueness() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_task_id_default() {
        let id = TaskId::default();
        assert!(id.as_u64() > 0);
        assert_eq!(id.to_string(), format!("#{}", id.as_u64()));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_task_creation() {
        let task = detached_task();
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.priority(), Priority::Normal);
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_schedule_without_scheduler_abandons() {
        let task = detached_task();
        task.schedule();
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.future.lock().is_none());

        // Completed tasks ignore further wakeups
        task.schedule();
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn test_cancel_sets_flag() {
        let task = detached_task();
        task.cancel();
        assert!(task.is_cancelled());
    }
}
