//! Parking mutex

use super::Lockable;
use parking_lot::lock_api::RawMutex as _;
use std::fmt;

/// Blocking mutex backed by `parking_lot`'s raw lock
///
/// Contended callers park their thread. Unlike [`parking_lot::Mutex`] it owns
/// no data; pair it with [`Protected`](crate::Protected) for that.
pub struct Mutex {
    raw: parking_lot::RawMutex,
}

impl Mutex {
    /// Create an unlocked mutex
    pub const fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable for Mutex {
    #[inline]
    fn lock(&self) {
        self.raw.lock();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.raw.unlock();
    }

    fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mutex_creation() {
        let mutex = Mutex::new();
        assert!(!mutex.is_locked());
        assert_eq!(format!("{:?}", mutex), "Mutex { locked: false }");
    }

    #[test]
    fn test_mutex_uncontended_lock_unlock() {
        let mutex = Mutex::new();
        mutex.lock();
        assert!(mutex.is_locked());
        unsafe { mutex.unlock() };
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_mutex_blocks_second_locker() {
        let mutex = Arc::new(Mutex::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let guard = mutex.guard();
        let handle = {
            let mutex = mutex.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                mutex.with_lock(|| acquired.store(true, Ordering::SeqCst));
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);

        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
