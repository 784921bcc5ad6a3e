//! Main task scheduler coordinating worker threads

use crate::config::SchedulerConfig;
use crate::scheduler::context;
use crate::scheduler::join::{
    catch_unwind, panic_message, Completion, JoinError, JoinHandle, JoinState,
};
use crate::scheduler::task::{Priority, Task, TaskId};
use crate::scheduler::worker;
use crate::RuntimeResult;
use crossbeam_deque::{Injector, Steal, Stealer};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks whose future ran to completion
    pub tasks_completed: u64,

    /// Worker threads currently alive (including blocked ones)
    pub live_workers: usize,

    /// Workers currently blocked in a synchronous section
    pub blocked_workers: usize,
}

/// Worker pool occupancy
///
/// Both counts live under one lock so retirement and compensation decide on
/// the same snapshot.
#[derive(Debug, Clone, Copy, Default)]
struct PoolCounts {
    /// Worker threads alive, blocked ones included
    live: usize,

    /// Workers inside a synchronous section
    blocked: usize,
}

impl PoolCounts {
    fn free(&self) -> usize {
        self.live.saturating_sub(self.blocked)
    }
}

/// State shared by the scheduler, its handles and its workers
pub(crate) struct Shared {
    /// Resolved configuration
    pub(crate) config: SchedulerConfig,

    /// Global injectors, one per priority
    high: Injector<Arc<Task>>,
    normal: Injector<Arc<Task>>,
    low: Injector<Arc<Task>>,

    /// Stealers of all live workers, keyed by worker ID
    stealers: RwLock<Vec<(usize, Stealer<Arc<Task>>)>>,

    /// Idle workers park here
    idle_lock: Mutex<()>,
    idle: Condvar,

    pool: Mutex<PoolCounts>,
    next_worker_id: AtomicUsize,

    /// Shutdown signal
    shutdown: AtomicBool,

    tasks_spawned: AtomicU64,
    tasks_completed: AtomicU64,

    /// Worker thread handles (joined on shutdown)
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            high: Injector::new(),
            normal: Injector::new(),
            low: Injector::new(),
            stealers: RwLock::new(Vec::new()),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            pool: Mutex::new(PoolCounts::default()),
            next_worker_id: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            tasks_spawned: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue a runnable task
    ///
    /// `yielded` tasks skip the local LIFO slot so other work runs first.
    pub(crate) fn schedule(self: &Arc<Self>, task: Arc<Task>, yielded: bool) {
        if self.is_shutdown() {
            task.abandon();
            return;
        }
        match task.priority() {
            Priority::High => self.high.push(task),
            Priority::Low => self.low.push(task),
            Priority::Normal if yielded => self.normal.push(task),
            Priority::Normal => {
                if let Err(task) = context::push_local(self, task) {
                    self.normal.push(task);
                }
            }
        }
        self.notify_one();
    }

    /// Return a task to the global normal queue
    pub(crate) fn reinject(&self, task: Arc<Task>) {
        self.normal.push(task);
        self.notify_one();
    }

    fn notify_one(&self) {
        // Taking the lock orders this push before a parking worker's emptiness check
        drop(self.idle_lock.lock());
        self.idle.notify_one();
    }

    fn has_injected_work(&self) -> bool {
        !self.high.is_empty() || !self.normal.is_empty() || !self.low.is_empty()
    }

    /// Park an idle worker until work arrives or the timeout expires
    pub(crate) fn park(&self) {
        let mut guard = self.idle_lock.lock();
        if self.is_shutdown() || self.has_injected_work() {
            return;
        }
        self.idle.wait_for(&mut guard, self.config.park_timeout);
    }

    pub(crate) fn steal_high(&self) -> Option<Arc<Task>> {
        steal_from(&self.high)
    }

    pub(crate) fn steal_normal(&self) -> Option<Arc<Task>> {
        steal_from(&self.normal)
    }

    pub(crate) fn steal_low(&self) -> Option<Arc<Task>> {
        steal_from(&self.low)
    }

    /// Steal from other workers, starting at a random victim
    pub(crate) fn steal_from_others(&self, own_id: usize) -> Option<Arc<Task>> {
        use rand::Rng;

        let stealers = self.stealers.read();
        if stealers.is_empty() {
            return None;
        }

        let start = rand::thread_rng().gen_range(0..stealers.len());
        for i in 0..stealers.len() {
            let (id, stealer) = &stealers[(start + i) % stealers.len()];
            if *id == own_id {
                continue;
            }
            loop {
                match stealer.steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    pub(crate) fn register_stealer(&self, id: usize, stealer: Stealer<Arc<Task>>) {
        self.stealers.write().push((id, stealer));
    }

    pub(crate) fn unregister_stealer(&self, id: usize) {
        self.stealers.write().retain(|(worker_id, _)| *worker_id != id);
    }

    pub(crate) fn record_completion(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Start one more worker thread
    pub(crate) fn spawn_worker(self: &Arc<Self>) -> RuntimeResult<usize> {
        self.pool.lock().live += 1;
        self.start_worker()
    }

    /// Start a worker thread whose slot is already counted as live
    fn start_worker(self: &Arc<Self>) -> RuntimeResult<usize> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);

        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name, id))
            .spawn(move || worker::run(shared, id));

        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock();
                threads.retain(|handle| !handle.is_finished());
                threads.push(handle);
                Ok(id)
            }
            Err(err) => {
                self.pool.lock().live -= 1;
                Err(err.into())
            }
        }
    }

    /// Decide whether an idle worker is surplus; if so, account for its exit
    pub(crate) fn try_retire(&self) -> bool {
        let mut pool = self.pool.lock();
        if pool.free() <= self.config.worker_threads {
            return false;
        }
        pool.live -= 1;
        true
    }

    /// Account for a worker that exits on shutdown
    pub(crate) fn worker_exited(&self) {
        self.pool.lock().live -= 1;
    }

    /// The calling worker is about to block
    pub(crate) fn enter_blocking(self: &Arc<Self>) {
        let moved = context::drain_local(self);

        let (live, blocked) = {
            let mut pool = self.pool.lock();
            pool.blocked += 1;
            if pool.free() >= self.config.worker_threads || self.is_shutdown() {
                return;
            }
            if self.config.max_workers.is_some_and(|max| pool.live >= max) {
                let (live, blocked) = (pool.live, pool.blocked);
                drop(pool);
                tracing::warn!(
                    live,
                    blocked,
                    "worker cap reached; tasks spawned by blocked callers may starve"
                );
                return;
            }
            // Reserve the slot before unlocking so a retiring worker sees it
            pool.live += 1;
            (pool.live, pool.blocked)
        };

        match self.start_worker() {
            Ok(id) => tracing::debug!(
                worker = id,
                live,
                blocked,
                moved,
                "started compensating worker"
            ),
            Err(err) => tracing::warn!(error = %err, "failed to start compensating worker"),
        }
    }

    /// The calling worker has stopped blocking
    pub(crate) fn exit_blocking(&self) {
        self.pool.lock().blocked -= 1;
    }

    fn drain_injectors(&self) {
        while let Some(task) = self
            .steal_high()
            .or_else(|| self.steal_normal())
            .or_else(|| self.steal_low())
        {
            task.abandon();
        }
    }

    fn stats(&self) -> SchedulerStats {
        let pool = *self.pool.lock();
        SchedulerStats {
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            live_workers: pool.live,
            blocked_workers: pool.blocked,
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }

        // Abandoning queued tasks releases anyone blocked on their results
        self.drain_injectors();

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        // Workers hand their local queues back on exit
        self.drain_injectors();
        tracing::debug!("scheduler shut down");
    }
}

fn steal_from(injector: &Injector<Arc<Task>>) -> Option<Arc<Task>> {
    loop {
        match injector.steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

/// Cloneable reference to a running scheduler
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Handle of the scheduler owning the current worker thread
    ///
    /// # Panics
    /// Panics when called outside a worker thread.
    pub fn current() -> Self {
        match Self::try_current() {
            Some(handle) => handle,
            None => panic!("Handle::current() called outside a strand worker thread"),
        }
    }

    /// Handle of the scheduler owning the current worker thread, if any
    pub fn try_current() -> Option<Self> {
        context::current_shared().map(|shared| Self { shared })
    }

    /// Handle of the current scheduler, falling back to [`Scheduler::global`]
    pub fn current_or_global() -> Self {
        Self::try_current().unwrap_or_else(|| Scheduler::global().handle().clone())
    }

    /// Spawn a task inheriting the caller's priority
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let priority = context::current_priority().unwrap_or_default();
        self.spawn_with_priority(priority, future)
    }

    /// Spawn a task with a priority hint
    pub fn spawn_with_priority<F>(&self, priority: Priority, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = TaskId::new();
        let state = JoinState::new();
        let completion = Completion::new(state.clone(), id);

        let wrapped = async move {
            match catch_unwind(future).await {
                Ok(value) => completion.complete(Ok(value)),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    tracing::warn!(task = %id, "task panicked: {}", message);
                    completion.complete(Err(JoinError::Panicked(id, message)));
                }
            }
        };

        let task = Arc::new(Task::new(
            id,
            priority,
            Box::pin(wrapped),
            Arc::downgrade(&self.shared),
        ));
        self.shared.tasks_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(task = %id, ?priority, "spawned task");

        task.schedule();
        JoinHandle::new(state, Some(task), id)
    }

    /// Run a blocking function on a dedicated thread
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let id = TaskId::new();
        let state = JoinState::new();
        let completion = Completion::new(state.clone(), id);

        let spawned = thread::Builder::new()
            .name(format!("{}-blocking", self.shared.config.thread_name))
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
                    .map_err(|payload| JoinError::Panicked(id, panic_message(&*payload)));
                completion.complete(result);
            });
        if let Err(err) = spawned {
            // The closure (and its completion) was dropped: the handle reports Dropped
            tracing::warn!(task = %id, error = %err, "failed to start blocking thread");
        }

        JoinHandle::new(state, None, id)
    }

    /// Run a future to completion, blocking the calling thread
    ///
    /// A panic inside the future is re-raised here.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self.spawn(future).join() {
            Ok(value) => value,
            Err(err) => err.resume(),
        }
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    /// Configuration the scheduler runs with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Whether the scheduler has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

/// Main task scheduler
///
/// Dropping the scheduler shuts it down: queued tasks are abandoned (their
/// handles report [`JoinError::Dropped`]) and worker threads are joined.
pub struct Scheduler {
    handle: Handle,
}

static GLOBAL: Lazy<Scheduler> = Lazy::new(|| {
    Scheduler::new(SchedulerConfig::from_env())
        .unwrap_or_else(|err| panic!("Failed to start global scheduler: {}", err))
});

impl Scheduler {
    /// Create a scheduler and start its workers
    pub fn new(config: SchedulerConfig) -> RuntimeResult<Self> {
        let config = config.resolve()?;
        let worker_count = config.worker_threads;
        let shared = Arc::new(Shared::new(config));

        for _ in 0..worker_count {
            if let Err(err) = shared.spawn_worker() {
                shared.shutdown();
                return Err(err);
            }
        }
        tracing::debug!(workers = worker_count, "scheduler started");

        Ok(Self {
            handle: Handle { shared },
        })
    }

    /// Process-wide scheduler, started on first use from [`SchedulerConfig::from_env`]
    pub fn global() -> &'static Scheduler {
        &GLOBAL
    }

    /// Cloneable handle to this scheduler
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a task
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a future to completion, blocking the calling thread
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.block_on(future)
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    /// Stop all workers
    ///
    /// Blocks until every worker thread has exited.
    pub fn shutdown(&self) {
        self.handle.shared.shutdown();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
