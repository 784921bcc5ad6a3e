//! Blocking counting semaphore

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

/// Counting semaphore that blocks the calling thread
///
/// `wait` on a scheduler worker marks the worker blocked through
/// [`strand_runtime::block_in_place`], so tasks queued behind it keep running.
pub struct Semaphore {
    /// Available permits
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: parking_lot::const_mutex(permits),
            available: Condvar::new(),
        }
    }

    /// Return a permit, waking one waiter
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    /// Take a permit, blocking until one is available
    pub fn wait(&self) {
        if self.try_wait() {
            return;
        }
        strand_runtime::block_in_place(|| {
            let mut permits = self.permits.lock();
            while *permits == 0 {
                self.available.wait(&mut permits);
            }
            *permits -= 1;
        });
    }

    /// Take a permit, giving up after `timeout`
    ///
    /// Returns whether a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.try_wait() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        strand_runtime::block_in_place(|| {
            let mut permits = self.permits.lock();
            while *permits == 0 {
                if self.available.wait_until(&mut permits, deadline).timed_out() {
                    break;
                }
            }
            if *permits == 0 {
                return false;
            }
            *permits -= 1;
            true
        })
    }

    /// Take a permit if one is available right now
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Permits currently available
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .finish()
    }
}
