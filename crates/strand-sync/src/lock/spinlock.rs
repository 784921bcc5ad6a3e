//! Busy-waiting lock

use super::Lockable;
use crossbeam::utils::CachePadded;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

/// Spinlock over a single atomic flag
///
/// Suited to critical sections of a few instructions. Waiters spin on a
/// relaxed load until the flag looks free and only then attempt the CAS, so
/// the cache line is not hammered with writes while the lock is held.
pub struct Spinlock {
    locked: CachePadded<AtomicBool>,
}

impl Spinlock {
    /// Create an unlocked spinlock
    pub const fn new() -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
        }
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable for Spinlock {
    fn lock(&self) {
        loop {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Spinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.is_locked())
            .finish()
    }
}
