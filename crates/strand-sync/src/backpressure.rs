//! Retrying publish into a bounded sink

use crate::stream::{BufferingPolicy, StreamSender, YieldResult};
use crossbeam::channel::{Sender, TrySendError};
use strand_runtime::{is_cancelled, yield_now};

/// A bounded destination that reports whether an offered message was taken
///
/// `Dropped` and `Terminated` must hand back the *offered* message so the
/// publisher can retry it.
pub trait BackpressureSink<T> {
    /// Offer one message without waiting
    fn offer(&self, message: T) -> YieldResult<T>;
}

impl<T> BackpressureSink<T> for StreamSender<T> {
    fn offer(&self, message: T) -> YieldResult<T> {
        match self.try_yield(message) {
            // The offered message was buffered; an older one made room for it
            YieldResult::Dropped(_evicted)
                if matches!(self.policy(), BufferingPolicy::BufferingNewest(n) if n > 0) =>
            {
                YieldResult::Enqueued { remaining: 0 }
            }
            other => other,
        }
    }
}

impl<T> BackpressureSink<T> for Sender<T> {
    fn offer(&self, message: T) -> YieldResult<T> {
        match self.try_send(message) {
            Ok(()) => YieldResult::Enqueued {
                remaining: self
                    .capacity()
                    .map_or(usize::MAX, |capacity| capacity.saturating_sub(self.len())),
            },
            Err(TrySendError::Full(message)) => YieldResult::Dropped(message),
            Err(TrySendError::Disconnected(message)) => YieldResult::Terminated(message),
        }
    }
}

/// Terminal state of a backpressured publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The sink took the message
    Enqueued,
    /// The sink is closed; the message was discarded
    Terminated,
    /// The publishing task was cancelled while the sink was full
    Cancelled,
}

enum PublishState<T> {
    Offer(T),
    Retry(T),
}

/// Publish `message` into `sink`, yielding and retrying while the sink is full
///
/// There is no retry bound: a full sink is retried until it accepts the
/// message, closes, or the calling task is cancelled. Cancellation is checked
/// once per rejected offer.
pub async fn publish_with_backpressure<T, S>(message: T, sink: &S) -> PublishOutcome
where
    S: BackpressureSink<T> + ?Sized,
{
    let mut state = PublishState::Offer(message);
    let mut retries = 0u64;

    loop {
        state = match state {
            PublishState::Offer(message) => match sink.offer(message) {
                YieldResult::Enqueued { .. } => return PublishOutcome::Enqueued,
                YieldResult::Terminated(_) => return PublishOutcome::Terminated,
                YieldResult::Dropped(message) => {
                    if is_cancelled() {
                        tracing::trace!(retries, "publish cancelled");
                        return PublishOutcome::Cancelled;
                    }
                    PublishState::Retry(message)
                }
            },
            PublishState::Retry(message) => {
                retries += 1;
                tracing::trace!(retries, "sink full, yielding");
                yield_now().await;
                PublishState::Offer(message)
            }
        };
    }
}

/// Publish `message` with backpressure
///
/// Returns `true` if the sink took the message and `false` if the sink is
/// closed or the calling task was cancelled.
pub async fn yield_with_backpressure<T, S>(message: T, sink: &S) -> bool
where
    S: BackpressureSink<T> + ?Sized,
{
    publish_with_backpressure(message, sink).await == PublishOutcome::Enqueued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::make_stream;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use strand_runtime::{Scheduler, SchedulerConfig};

    /// Rejects the first `rejections` offers, then accepts everything
    struct FlakySink {
        rejections: Mutex<usize>,
        accepted: Mutex<Vec<u32>>,
    }

    impl BackpressureSink<u32> for FlakySink {
        fn offer(&self, message: u32) -> YieldResult<u32> {
            let mut rejections = self.rejections.lock();
            if *rejections > 0 {
                *rejections -= 1;
                return YieldResult::Dropped(message);
            }
            self.accepted.lock().push(message);
            YieldResult::Enqueued { remaining: 1 }
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap()
    }

    #[test]
    fn test_retries_until_accepted() {
        let sink = Arc::new(FlakySink {
            rejections: Mutex::new(5),
            accepted: Mutex::new(Vec::new()),
        });

        let sink_in = sink.clone();
        let outcome =
            scheduler().block_on(async move { publish_with_backpressure(9, &*sink_in).await });

        assert_eq!(outcome, PublishOutcome::Enqueued);
        assert_eq!(*sink.rejections.lock(), 0);
        assert_eq!(*sink.accepted.lock(), vec![9]);
    }

    #[test]
    fn test_terminated_stream_returns_false() {
        let (tx, rx) = make_stream::<u32>(BufferingPolicy::Unbounded);
        drop(rx);
        let published =
            scheduler().block_on(async move { yield_with_backpressure(1, &tx).await });
        assert!(!published);
    }

    #[test]
    fn test_newest_policy_counts_eviction_as_enqueued() {
        let (tx, mut rx) = make_stream(BufferingPolicy::BufferingNewest(1));
        assert!(tx.offer(1).is_enqueued());
        assert!(tx.offer(2).is_enqueued());
        assert_eq!(rx.try_recv(), Ok(2));
    }

    #[test]
    fn test_crossbeam_sender_sink() {
        let (tx, rx) = crossbeam::channel::bounded(1);
        assert_eq!(tx.offer(1), YieldResult::Enqueued { remaining: 0 });
        assert_eq!(tx.offer(2), YieldResult::Dropped(2));
        assert_eq!(rx.recv(), Ok(1));
        drop(rx);
        assert_eq!(tx.offer(3), YieldResult::Terminated(3));
    }
}
