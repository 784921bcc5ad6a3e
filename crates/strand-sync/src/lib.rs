//! Strand concurrency primitives
//!
//! Building blocks for code running on the strand cooperative scheduler:
//! - [`Mutex`] and [`Spinlock`], interchangeable behind the [`Lockable`] trait
//! - [`Protected`], a value reachable only through its lock, and [`LockedMap`]
//! - [`Event`], a resettable signal that suspends waiting tasks
//! - [`concurrent_map`] and friends, an order-preserving batched parallel map
//! - [`run_sync`], a bridge that blocks synchronous callers on async work
//! - [`yield_with_backpressure`], a retrying publish into bounded streams
//!
//! Scheduling (spawn, priorities, cancellation flags) comes from
//! [`strand_runtime`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backpressure;
pub mod concurrent_map;
pub mod event;
pub mod lock;
pub mod locked_map;
pub mod protected;
pub mod run_sync;
pub mod semaphore;
pub mod stream;

pub use backpressure::{
    publish_with_backpressure, yield_with_backpressure, BackpressureSink, PublishOutcome,
};
pub use concurrent_map::{
    concurrent_map, concurrent_map_async, try_concurrent_map, DEFAULT_MIN_BATCH_SIZE,
};
pub use event::{Event, EventWait};
pub use lock::{LockGuard, Lockable, Mutex, Spinlock};
pub use locked_map::LockedMap;
pub use protected::Protected;
pub use run_sync::{for_blocking, run_sync, try_run_sync};
pub use semaphore::Semaphore;
pub use stream::{
    make_single_stream, make_stream, BufferingPolicy, Recv, StreamReceiver, StreamSender,
    TryRecvError, YieldResult,
};

pub use strand_runtime::Priority;
