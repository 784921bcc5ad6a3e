//! A value that can only be reached through its lock

use crate::lock::{Lockable, Mutex};
use std::cell::UnsafeCell;
use std::fmt;

/// A value co-located with the lock that guards it
///
/// [`read`](Self::read) and [`write`](Self::write) are the only ways to reach
/// the value from shared references; both hold the lock for the duration of
/// the closure and release it on every exit path, panics included.
///
/// Calling `read` or `write` on the same instance from inside one of those
/// closures deadlocks: the locks are not reentrant.
pub struct Protected<T, L: Lockable = Mutex> {
    lock: L,
    value: UnsafeCell<T>,
}

// SAFETY: the value is only reached while `lock` is held, so sharing a
// Protected hands out at most one `&mut T` at a time across threads.
unsafe impl<T: Send, L: Lockable + Send> Send for Protected<T, L> {}
unsafe impl<T: Send, L: Lockable + Sync> Sync for Protected<T, L> {}

impl<T> Protected<T> {
    /// Guard `value` with a [`Mutex`]
    pub fn new(value: T) -> Self {
        Self::with_lock(value, Mutex::new())
    }
}

impl<T, L: Lockable> Protected<T, L> {
    /// Guard `value` with the given lock
    pub fn with_lock(value: T, lock: L) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    /// Run `body` with shared access to the value
    pub fn read<R>(&self, body: impl FnOnce(&T) -> R) -> R {
        let _guard = self.lock.guard();
        // SAFETY: the guard holds the lock until after `body` returns
        body(unsafe { &*self.value.get() })
    }

    /// Run `body` with exclusive access to the value
    pub fn write<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        let _guard = self.lock.guard();
        // SAFETY: the guard holds the lock until after `body` returns
        body(unsafe { &mut *self.value.get() })
    }

    /// Replace the value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        self.write(|current| std::mem::replace(current, value))
    }

    /// Overwrite the value
    pub fn set(&self, value: T) {
        self.write(|current| *current = value);
    }

    /// Exclusive access without locking (the borrow proves there are no other users)
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the wrapper and return the value
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Clone, L: Lockable> Protected<T, L> {
    /// Clone the value out
    pub fn get(&self) -> T {
        self.read(T::clone)
    }
}

impl<T: Default> Default for Protected<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> From<T> for Protected<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug, L: Lockable> fmt::Debug for Protected<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Protected");
        match self.lock.try_guard() {
            Some(_guard) => {
                // SAFETY: the guard holds the lock while the value is formatted
                d.field("value", unsafe { &*self.value.get() });
            }
            None => {
                d.field("value", &format_args!("<locked>"));
            }
        }
        d.finish()
    }
}
