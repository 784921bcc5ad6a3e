//! Bridges between synchronous callers and suspending work

use crate::semaphore::Semaphore;
use crossbeam::atomic::AtomicCell;
use std::any::Any;
use std::future::Future;
use std::panic;
use std::sync::Arc;
use strand_runtime::{catch_unwind, current_priority, spawn_blocking, Handle, Priority};

type Outcome<T> = Result<T, Box<dyn Any + Send>>;

/// Single-slot cell written once by the bridge task, read once by the caller
struct ResultCell<T> {
    slot: AtomicCell<Option<Outcome<T>>>,
    ready: Semaphore,
}

/// Writer side of a [`ResultCell`]; signals the caller exactly once, even if
/// the task is dropped before it produces an outcome
struct Publisher<T> {
    cell: Arc<ResultCell<T>>,
}

impl<T> Publisher<T> {
    fn publish(self, outcome: Outcome<T>) {
        self.cell.slot.store(Some(outcome));
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.cell.ready.signal();
    }
}

/// Run a suspending operation to completion from synchronous code
///
/// The operation runs as a new task with `priority`, or the caller's own
/// priority when `None`. The calling thread blocks until the task finishes;
/// on a scheduler worker it is counted as blocked so nested calls keep
/// making progress.
///
/// # Panics
/// Re-raises a panic from `operation`. Panics if the scheduler shuts down
/// before the operation completes.
pub fn run_sync<T, F, Fut>(priority: Option<Priority>, operation: F) -> T
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let cell = Arc::new(ResultCell {
        slot: AtomicCell::new(None),
        ready: Semaphore::new(0),
    });
    let priority = priority.or_else(current_priority).unwrap_or_default();

    let publisher = Publisher { cell: cell.clone() };
    let task = Handle::current_or_global().spawn_with_priority(priority, async move {
        let outcome = catch_unwind(async move { operation().await }).await;
        publisher.publish(outcome);
    });
    tracing::trace!(task = %task.id(), ?priority, "run_sync waiting");
    drop(task);

    cell.ready.wait();
    match cell.slot.take() {
        Some(Ok(value)) => value,
        Some(Err(payload)) => panic::resume_unwind(payload),
        None => panic!("run_sync operation was dropped before completion"),
    }
}

/// [`run_sync`] for a fallible operation
///
/// Returns exactly the error the operation produced.
pub fn try_run_sync<T, E, F, Fut>(priority: Option<Priority>, operation: F) -> Result<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    run_sync(priority, operation)
}

/// Run a blocking function on a dedicated thread and suspend until it returns
///
/// # Panics
/// Re-raises a panic from `body`.
pub async fn for_blocking<T, F>(body: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match spawn_blocking(body).await {
        Ok(value) => value,
        Err(err) => err.resume(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use strand_runtime::{Scheduler, SchedulerConfig};

    #[test]
    fn test_run_sync_returns_value() {
        let value = run_sync(None, || async { 6 * 7 });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_sync_uses_priority_hint() {
        let priority = run_sync(Some(Priority::High), || async { current_priority() });
        assert_eq!(priority, Some(Priority::High));

        let inherited = run_sync(None, || async { current_priority() });
        assert_eq!(inherited, Some(Priority::Normal));
    }

    #[test]
    fn test_try_run_sync_passes_error_through() {
        let result: Result<u8, String> = try_run_sync(None, || async { Err("nope".to_string()) });
        assert_eq!(result, Err("nope".to_string()));
    }

    #[test]
    fn test_run_sync_reraises_panic() {
        fn explode() -> u8 {
            panic!("bridge failure")
        }

        let result =
            panic::catch_unwind(AssertUnwindSafe(|| run_sync(None, || async { explode() })));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"bridge failure"));
    }

    #[test]
    fn test_run_sync_inside_task() {
        let scheduler =
            Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap();
        let value = scheduler.block_on(async { run_sync(None, || async { 5 }) + 1 });
        assert_eq!(value, 6);
    }

    #[test]
    fn test_for_blocking() {
        let scheduler =
            Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap();
        let value = scheduler.block_on(for_blocking(|| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            "slow"
        }));
        assert_eq!(value, "slow");
    }
}
