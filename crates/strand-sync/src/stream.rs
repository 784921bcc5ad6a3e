//! Single-consumer stream with a configurable buffering policy

use crate::protected::Protected;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// How a stream's buffer behaves when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferingPolicy {
    /// Never full
    #[default]
    Unbounded,
    /// Keep the oldest `n` elements; new elements are rejected when full
    BufferingOldest(usize),
    /// Keep the newest `n` elements; the oldest is evicted when full
    BufferingNewest(usize),
}

/// Outcome of [`StreamSender::try_yield`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YieldResult<T> {
    /// The element was buffered; `remaining` free slots are left
    /// (`usize::MAX` for unbounded streams)
    Enqueued {
        /// Free buffer slots after the insert
        remaining: usize,
    },
    /// An element was dropped because the buffer was full
    ///
    /// Under [`BufferingPolicy::BufferingOldest`] this is the element just
    /// offered; under [`BufferingPolicy::BufferingNewest`] it is the evicted
    /// oldest element and the offered one was buffered.
    Dropped(T),
    /// The stream is finished or its receiver is gone; the element is returned
    Terminated(T),
}

impl<T> YieldResult<T> {
    /// Whether the offered element is now in the buffer
    pub fn is_enqueued(&self) -> bool {
        matches!(self, YieldResult::Enqueued { .. })
    }
}

/// Errors returned by [`StreamReceiver::try_recv`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// Nothing buffered right now
    #[error("stream is empty")]
    Empty,

    /// Nothing buffered and no more elements will arrive
    #[error("stream is terminated")]
    Terminated,
}

struct StreamState<T> {
    buffer: VecDeque<T>,
    policy: BufferingPolicy,
    /// No further elements are accepted
    finished: bool,
    senders: usize,
    /// Receiver suspended in `recv`
    waker: Option<Waker>,
}

impl<T> StreamState<T> {
    fn push(&mut self, value: T) -> YieldResult<T> {
        if self.finished {
            return YieldResult::Terminated(value);
        }
        match self.policy {
            BufferingPolicy::Unbounded => {
                self.buffer.push_back(value);
                YieldResult::Enqueued {
                    remaining: usize::MAX,
                }
            }
            BufferingPolicy::BufferingOldest(limit) => {
                if self.buffer.len() >= limit {
                    return YieldResult::Dropped(value);
                }
                self.buffer.push_back(value);
                YieldResult::Enqueued {
                    remaining: limit - self.buffer.len(),
                }
            }
            BufferingPolicy::BufferingNewest(0) => YieldResult::Dropped(value),
            BufferingPolicy::BufferingNewest(limit) => {
                let evicted = if self.buffer.len() >= limit {
                    self.buffer.pop_front()
                } else {
                    None
                };
                self.buffer.push_back(value);
                match evicted {
                    Some(evicted) => YieldResult::Dropped(evicted),
                    None => YieldResult::Enqueued {
                        remaining: limit - self.buffer.len(),
                    },
                }
            }
        }
    }

    fn finish(&mut self) -> Option<Waker> {
        self.finished = true;
        self.waker.take()
    }
}

/// Create a stream with the given buffering policy
pub fn make_stream<T>(policy: BufferingPolicy) -> (StreamSender<T>, StreamReceiver<T>) {
    let shared = Arc::new(Protected::new(StreamState {
        buffer: VecDeque::new(),
        policy,
        finished: false,
        senders: 1,
        waker: None,
    }));
    (
        StreamSender {
            shared: shared.clone(),
        },
        StreamReceiver { shared },
    )
}

/// Create a stream that only keeps the latest element
pub fn make_single_stream<T>() -> (StreamSender<T>, StreamReceiver<T>) {
    make_stream(BufferingPolicy::BufferingNewest(1))
}

/// Producer side of a stream
///
/// Cloneable; the stream finishes when [`finish`](Self::finish) is called or
/// the last sender is dropped.
pub struct StreamSender<T> {
    shared: Arc<Protected<StreamState<T>>>,
}

impl<T> StreamSender<T> {
    /// Offer an element without waiting
    pub fn try_yield(&self, value: T) -> YieldResult<T> {
        let (result, waker) = self.shared.write(|state| {
            let result = state.push(value);
            let waker = if state.buffer.is_empty() {
                None
            } else {
                state.waker.take()
            };
            (result, waker)
        });
        if let Some(waker) = waker {
            waker.wake();
        }
        result
    }

    /// Stop accepting elements; buffered elements are still delivered
    pub fn finish(&self) {
        if let Some(waker) = self.shared.write(StreamState::finish) {
            waker.wake();
        }
    }

    /// Whether elements are no longer accepted
    pub fn is_terminated(&self) -> bool {
        self.shared.read(|state| state.finished)
    }

    /// The stream's buffering policy
    pub fn policy(&self) -> BufferingPolicy {
        self.shared.read(|state| state.policy)
    }
}

impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        self.shared.write(|state| state.senders += 1);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for StreamSender<T> {
    fn drop(&mut self) {
        let waker = self.shared.write(|state| {
            state.senders -= 1;
            if state.senders == 0 {
                state.finish()
            } else {
                None
            }
        });
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for StreamSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSender")
            .field("policy", &self.policy())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Consumer side of a stream
///
/// Dropping the receiver terminates the stream: senders see
/// [`YieldResult::Terminated`] from then on.
pub struct StreamReceiver<T> {
    shared: Arc<Protected<StreamState<T>>>,
}

impl<T> StreamReceiver<T> {
    /// Receive the next element, or `None` once the stream is finished and drained
    pub fn recv(&mut self) -> Recv<'_, T> {
        Recv { receiver: self }
    }

    /// Take the next element if one is buffered
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.shared.write(|state| match state.buffer.pop_front() {
            Some(value) => Ok(value),
            None if state.finished => Err(TryRecvError::Terminated),
            None => Err(TryRecvError::Empty),
        })
    }

    /// Number of buffered elements
    pub fn len(&self) -> usize {
        self.shared.read(|state| state.buffer.len())
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.shared.write(|state| {
            if let Some(value) = state.buffer.pop_front() {
                return Poll::Ready(Some(value));
            }
            if state.finished {
                return Poll::Ready(None);
            }
            match &state.waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                _ => state.waker = Some(cx.waker().clone()),
            }
            Poll::Pending
        })
    }
}

impl<T> Drop for StreamReceiver<T> {
    fn drop(&mut self) {
        let buffered = self.shared.write(|state| {
            state.finished = true;
            state.waker = None;
            std::mem::take(&mut state.buffer)
        });
        drop(buffered);
    }
}

impl<T> fmt::Debug for StreamReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReceiver")
            .field("buffered", &self.len())
            .finish()
    }
}

/// Future returned by [`StreamReceiver::recv`]
#[must_use = "futures do nothing unless awaited"]
pub struct Recv<'a, T> {
    receiver: &'a mut StreamReceiver<T>,
}

impl<T> Future for Recv<'_, T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_stream() {
        let (tx, mut rx) = make_stream(BufferingPolicy::Unbounded);
        assert_eq!(
            tx.try_yield(1),
            YieldResult::Enqueued {
                remaining: usize::MAX
            }
        );
        tx.try_yield(2);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_buffering_oldest_rejects_incoming() {
        let (tx, mut rx) = make_stream(BufferingPolicy::BufferingOldest(2));
        assert_eq!(tx.try_yield('a'), YieldResult::Enqueued { remaining: 1 });
        assert_eq!(tx.try_yield('b'), YieldResult::Enqueued { remaining: 0 });
        assert_eq!(tx.try_yield('c'), YieldResult::Dropped('c'));
        assert_eq!(rx.try_recv(), Ok('a'));
        assert_eq!(tx.try_yield('d'), YieldResult::Enqueued { remaining: 0 });
        assert_eq!(rx.try_recv(), Ok('b'));
        assert_eq!(rx.try_recv(), Ok('d'));
    }

    #[test]
    fn test_single_stream_keeps_latest() {
        let (tx, mut rx) = make_single_stream();
        assert_eq!(tx.policy(), BufferingPolicy::BufferingNewest(1));
        assert_eq!(tx.try_yield(1), YieldResult::Enqueued { remaining: 0 });
        assert_eq!(tx.try_yield(2), YieldResult::Dropped(1));
        assert_eq!(tx.try_yield(3), YieldResult::Dropped(2));
        assert_eq!(rx.try_recv(), Ok(3));
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let (tx, _rx) = make_stream(BufferingPolicy::BufferingNewest(0));
        assert_eq!(tx.try_yield(1), YieldResult::Dropped(1));
        let (tx, _rx) = make_stream(BufferingPolicy::BufferingOldest(0));
        assert_eq!(tx.try_yield(1), YieldResult::Dropped(1));
    }

    #[test]
    fn test_finish_drains_then_terminates() {
        let (tx, mut rx) = make_stream(BufferingPolicy::Unbounded);
        tx.try_yield(1);
        tx.finish();
        assert!(tx.is_terminated());
        assert_eq!(tx.try_yield(2), YieldResult::Terminated(2));
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Terminated));
    }

    #[test]
    fn test_last_sender_drop_finishes() {
        let (tx, mut rx) = make_stream::<u8>(BufferingPolicy::Unbounded);
        let tx2 = tx.clone();
        drop(tx);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        drop(tx2);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Terminated));
    }

    #[test]
    fn test_receiver_drop_terminates() {
        let (tx, rx) = make_stream(BufferingPolicy::Unbounded);
        tx.try_yield("kept");
        drop(rx);
        assert!(tx.is_terminated());
        assert_eq!(tx.try_yield("late"), YieldResult::Terminated("late"));
    }

    #[test]
    fn test_recv_across_tasks() {
        let scheduler = strand_runtime::Scheduler::new(
            strand_runtime::SchedulerConfig::default().with_worker_threads(2),
        )
        .unwrap();
        let (tx, mut rx) = make_stream(BufferingPolicy::Unbounded);

        let consumer = scheduler.spawn(async move {
            let mut received = Vec::new();
            while let Some(value) = rx.recv().await {
                received.push(value);
            }
            received
        });
        for value in 0..100 {
            assert!(tx.try_yield(value).is_enqueued());
        }
        drop(tx);

        assert_eq!(consumer.join().unwrap(), (0..100).collect::<Vec<_>>());
    }
}
