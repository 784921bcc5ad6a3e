//! Task Scheduler - Work-Stealing Concurrency
//!
//! This module implements the goroutine-style work-stealing task scheduler the
//! strand primitives are hosted on. Tasks are futures; workers poll them and
//! park them until their waker fires.

mod context;
mod join;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
mod worker;

pub use context::{
    block_in_place, current_priority, current_task_id, is_cancelled, spawn, spawn_blocking,
    spawn_with_priority, yield_now, YieldNow,
};
pub use join::{catch_unwind, JoinError, JoinHandle};
pub use scheduler::{Handle, Scheduler, SchedulerStats};
pub use task::{Priority, TaskId, TaskState};
