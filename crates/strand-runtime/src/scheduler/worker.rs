//! Worker thread that executes Tasks
//!
//! Workers pick up tasks from the priority injectors, their own LIFO deque, or
//! steal from other workers, then poll them once per pick.

use crate::scheduler::context::{self, WorkerContext};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::Task;
use crossbeam_deque::Worker as CWorker;
use std::sync::Arc;

/// Worker thread main loop
pub(crate) fn run(shared: Arc<Shared>, id: usize) {
    // Create the worker deque on this thread (not Send, so must be created here)
    let local = CWorker::new_lifo();
    shared.register_stealer(id, local.stealer());
    context::set_worker(WorkerContext {
        id,
        shared: shared.clone(),
        local,
    });
    tracing::debug!(worker = id, "worker started");

    let retired = loop {
        // Check for shutdown signal
        if shared.is_shutdown() {
            break false;
        }

        match find_work(&shared, id) {
            Some(task) => task.run(&shared),
            None => {
                if shared.try_retire() {
                    break true;
                }
                shared.park();
            }
        }
    };

    // Hand anything still queued locally back to the injector
    if let Some(ctx) = context::take_worker() {
        while let Some(task) = ctx.local.pop() {
            shared.reinject(task);
        }
    }
    shared.unregister_stealer(id);
    if !retired {
        shared.worker_exited();
    }

    tracing::debug!(worker = id, retired, "worker stopped");
}

/// Find work: high-priority injector, local pop, normal injector, steal, low-priority injector
fn find_work(shared: &Shared, id: usize) -> Option<Arc<Task>> {
    shared
        .steal_high()
        .or_else(context::pop_local)
        .or_else(|| shared.steal_normal())
        .or_else(|| shared.steal_from_others(id))
        .or_else(|| shared.steal_low())
}
