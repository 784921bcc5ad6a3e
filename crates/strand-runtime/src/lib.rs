//! Strand host runtime
//!
//! This crate provides the cooperative scheduler the strand primitives run on:
//! - Work-stealing worker pool (goroutine-style green tasks over OS threads)
//! - Priority hints and cooperative cancellation flags
//! - Cooperative yield points
//! - A worker pool that grows while workers are blocked in synchronous bridges

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use scheduler::{
    block_in_place, catch_unwind, current_priority, current_task_id, is_cancelled, spawn,
    spawn_blocking, spawn_with_priority, yield_now, Handle, JoinError, JoinHandle, Priority,
    Scheduler, SchedulerStats, TaskId, YieldNow,
};

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The OS refused to start a worker thread
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Scheduler configuration is unusable
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;
