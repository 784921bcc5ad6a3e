//! Resettable signal that suspends waiting tasks

use crate::protected::Protected;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

/// Queued waiters, tagged so a wait future can find (and withdraw) its own entry
#[derive(Default)]
struct Waiters {
    entries: Vec<(u64, Waker)>,
}

impl Waiters {
    fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|(entry, _)| *entry == id)
    }
}

/// A manual-reset event
///
/// Tasks suspend in [`wait`](Self::wait) until the event is signaled. A
/// signal resumes every queued waiter and leaves the event signaled, so later
/// waits return immediately until [`reset`](Self::reset) is called.
///
/// The waiter queue is swapped out under the lock and woken after the lock is
/// released. A waiter that was resumed completes even if the event is reset
/// before it runs again.
pub struct Event {
    /// Readable without the lock; written only under it
    signaled: AtomicBool,
    waiters: Protected<Waiters>,
    next_waiter: AtomicU64,
}

impl Event {
    /// Create an event in the given initial state
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: AtomicBool::new(signaled),
            waiters: Protected::new(Waiters::default()),
            next_waiter: AtomicU64::new(0),
        }
    }

    /// Whether the event is signaled right now
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Wait until the event is signaled
    ///
    /// Returns immediately if it already is. Dropping the future before it
    /// completes withdraws it from the waiter queue.
    pub fn wait(&self) -> EventWait<'_> {
        EventWait {
            event: self,
            waiter: None,
        }
    }

    /// Signal the event, resuming every waiter
    ///
    /// Returns `true` if this call moved the event from non-signaled to
    /// signaled, `false` if it was already signaled.
    pub fn signal(&self) -> bool {
        if self.is_signaled() {
            return false;
        }

        let resumed = self.waiters.write(|waiters| {
            if self.signaled.load(Ordering::Acquire) {
                return None;
            }
            self.signaled.store(true, Ordering::Release);
            Some(std::mem::take(&mut waiters.entries))
        });

        match resumed {
            Some(entries) => {
                if !entries.is_empty() {
                    tracing::trace!(waiters = entries.len(), "event signaled");
                }
                for (_, waker) in entries {
                    waker.wake();
                }
                true
            }
            None => false,
        }
    }

    /// Move the event back to non-signaled
    ///
    /// Returns `true` if the event was signaled.
    pub fn reset(&self) -> bool {
        if !self.is_signaled() {
            return false;
        }

        self.waiters.write(|_| {
            if !self.signaled.load(Ordering::Acquire) {
                return false;
            }
            self.signaled.store(false, Ordering::Release);
            true
        })
    }

    /// Number of tasks currently suspended in [`wait`](Self::wait)
    pub fn waiter_count(&self) -> usize {
        self.waiters.read(|waiters| waiters.entries.len())
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// Future returned by [`Event::wait`]
#[must_use = "futures do nothing unless awaited"]
pub struct EventWait<'a> {
    event: &'a Event,
    /// Queue tag once registered
    waiter: Option<u64>,
}

impl Future for EventWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let event = self.event;

        match self.waiter {
            None => {
                if event.is_signaled() {
                    return Poll::Ready(());
                }
                let registered = event.waiters.write(|waiters| {
                    if event.signaled.load(Ordering::Acquire) {
                        return None;
                    }
                    let id = event.next_waiter.fetch_add(1, Ordering::Relaxed);
                    waiters.entries.push((id, cx.waker().clone()));
                    Some(id)
                });
                match registered {
                    Some(id) => {
                        self.waiter = Some(id);
                        Poll::Pending
                    }
                    None => Poll::Ready(()),
                }
            }
            Some(id) => {
                // Still queued means no signal has drained us yet
                let queued = event.waiters.write(|waiters| match waiters.position(id) {
                    Some(index) => {
                        let (_, waker) = &mut waiters.entries[index];
                        if !waker.will_wake(cx.waker()) {
                            *waker = cx.waker().clone();
                        }
                        true
                    }
                    None => false,
                });
                if queued {
                    Poll::Pending
                } else {
                    self.waiter = None;
                    Poll::Ready(())
                }
            }
        }
    }
}

impl Drop for EventWait<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.event.waiters.write(|waiters| {
                if let Some(index) = waiters.position(id) {
                    waiters.entries.remove(index);
                }
            });
        }
    }
}

impl fmt::Debug for EventWait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWait")
            .field("registered", &self.waiter.is_some())
            .finish()
    }
}
