//! Mutual-exclusion locks
//!
//! [`Mutex`] parks the calling thread while contended; [`Spinlock`] busy-waits.
//! Both implement [`Lockable`], so code such as [`Protected`](crate::Protected)
//! can be written once against either.
//!
//! Neither lock is reentrant: locking twice from the same owner deadlocks.
//! Neither is fair.

mod mutex;
mod spinlock;

pub use mutex::Mutex;
pub use spinlock::Spinlock;

/// Capability shared by the blocking locks
pub trait Lockable {
    /// Acquire the lock, blocking until it is available
    fn lock(&self);

    /// Acquire the lock if it is free right now
    fn try_lock(&self) -> bool;

    /// Release the lock
    ///
    /// # Safety
    /// The caller must hold the lock. Releasing a lock held by someone else
    /// breaks mutual exclusion for every user of it.
    unsafe fn unlock(&self);

    /// Whether the lock is currently held (a racy snapshot)
    fn is_locked(&self) -> bool;

    /// Acquire the lock and return a guard that releases it on drop
    fn guard(&self) -> LockGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        LockGuard { lock: self }
    }

    /// Like [`guard`](Self::guard), but only if the lock is free
    fn try_guard(&self) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.try_lock().then(|| LockGuard { lock: self })
    }

    /// Run `body` with the lock held
    ///
    /// The lock is released on every exit path, including unwinding out of a
    /// panicking `body`. Errors returned by `body` reach the caller after the
    /// release.
    fn with_lock<R>(&self, body: impl FnOnce() -> R) -> R
    where
        Self: Sized,
    {
        let _guard = self.guard();
        body()
    }
}

/// RAII guard for a [`Lockable`] (unlocks on drop)
#[must_use = "if unused the lock is released immediately"]
pub struct LockGuard<'a, L: Lockable> {
    lock: &'a L,
}

impl<L: Lockable> LockGuard<'_, L> {
    /// Release the lock before the guard goes out of scope
    pub fn unlock(self) {
        drop(self);
    }
}

impl<L: Lockable> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        // SAFETY: a guard only exists while its lock is held
        unsafe { self.lock.unlock() }
    }
}

impl<L: Lockable> std::fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    fn exercise<L: Lockable + Default>() {
        let lock = L::default();
        assert!(!lock.is_locked());

        let value = lock.with_lock(|| {
            assert!(lock.is_locked());
            assert!(!lock.try_lock());
            7
        });
        assert_eq!(value, 7);
        assert!(!lock.is_locked());

        let guard = lock.guard();
        assert!(lock.try_guard().is_none());
        guard.unlock();
        assert!(lock.try_guard().is_some());
        assert!(!lock.is_locked());
    }

    fn released_after_panic<L: Lockable + Default>() {
        let lock = L::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lock.with_lock(|| panic!("inside the critical section"))
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    fn error_flows_out<L: Lockable + Default>() {
        let lock = L::default();
        let result: Result<(), String> = lock.with_lock(|| Err("failed".to_string()));
        assert_eq!(result, Err("failed".to_string()));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_mutex_contract() {
        exercise::<Mutex>();
        released_after_panic::<Mutex>();
        error_flows_out::<Mutex>();
    }

    #[test]
    fn test_spinlock_contract() {
        exercise::<Spinlock>();
        released_after_panic::<Spinlock>();
        error_flows_out::<Spinlock>();
    }
}
