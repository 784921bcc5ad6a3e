//! Shared helpers for strand-runtime integration tests

#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};
use strand_runtime::{Scheduler, SchedulerConfig};

static INIT_LOGGING: Once = Once::new();

/// Route tracing output through the test harness
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Scheduler with a fixed worker count and logging enabled
pub fn test_scheduler(workers: usize) -> Scheduler {
    init_test_logging();
    Scheduler::new(SchedulerConfig::default().with_worker_threads(workers))
        .expect("failed to start test scheduler")
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
