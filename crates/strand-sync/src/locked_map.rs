//! Hash map shared behind a single lock

use crate::lock::{Lockable, Mutex};
use crate::protected::Protected;
use rustc_hash::FxHashMap;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

/// A hash map whose every access takes one lock
///
/// Lookups clone the value out so no reference escapes the critical section.
/// For compound updates use [`with_map`](Self::with_map).
pub struct LockedMap<K, V, L: Lockable = Mutex> {
    inner: Protected<FxHashMap<K, V>, L>,
}

impl<K: Eq + Hash, V> LockedMap<K, V> {
    /// Create an empty map guarded by a [`Mutex`]
    pub fn new() -> Self {
        Self {
            inner: Protected::new(FxHashMap::default()),
        }
    }
}

impl<K: Eq + Hash, V, L: Lockable> LockedMap<K, V, L> {
    /// Create an empty map guarded by the given lock
    pub fn with_lock(lock: L) -> Self {
        Self {
            inner: Protected::with_lock(FxHashMap::default(), lock),
        }
    }

    /// Clone out the value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.inner.read(|map| map.get(key).cloned())
    }

    /// Store `value` under `key`, returning the previous value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write(|map| map.insert(key, value))
    }

    /// Store or clear the entry for `key`
    ///
    /// `None` removes the key.
    pub fn set(&self, key: K, value: Option<V>) -> Option<V> {
        match value {
            Some(value) => self.insert(key, value),
            None => self.remove(&key),
        }
    }

    /// Remove the entry for `key`
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.write(|map| map.remove(key))
    }

    /// Whether `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.read(|map| map.contains_key(key))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.read(|map| map.len())
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `body` with the whole map locked
    pub fn with_map<R>(&self, body: impl FnOnce(&mut FxHashMap<K, V>) -> R) -> R {
        self.inner.write(body)
    }

    /// Consume the wrapper and return the map
    pub fn into_inner(self) -> FxHashMap<K, V> {
        self.inner.into_inner()
    }
}

impl<K: Eq + Hash, V> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, L: Lockable> fmt::Debug for LockedMap<K, V, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedMap").field("inner", &self.inner).finish()
    }
}
