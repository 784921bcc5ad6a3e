//! Order-preserving parallel map over a slice
//!
//! The input is split into `ceil(n / min_batch_size)` contiguous batches, one
//! task per batch. Batch `i` covers `[i * n / batches, (i + 1) * n / batches)`,
//! so batch sizes differ by at most one. Results are gathered in batch order,
//! which keeps the output in input order.
//!
//! Every dispatched batch is awaited before returning. If any batch failed,
//! the failure of the earliest batch is reported and no partial output is
//! returned; a panicking transform is re-raised on the caller.

use std::convert::Infallible;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use strand_runtime::{spawn, JoinError, JoinHandle};

/// Default lower bound on the number of elements per batch
pub const DEFAULT_MIN_BATCH_SIZE: usize = 4096;

/// Partition of `len` elements into contiguous batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    len: usize,
    batches: usize,
}

impl BatchPlan {
    /// # Panics
    /// Panics if `min_batch_size` is zero.
    pub(crate) fn new(len: usize, min_batch_size: usize) -> Self {
        assert!(min_batch_size >= 1, "min_batch_size must be at least 1");
        Self {
            len,
            batches: len.div_ceil(min_batch_size),
        }
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.batches
    }

    /// Fewer than two batches run without batching
    pub(crate) fn is_parallel(&self) -> bool {
        self.batches >= 2
    }

    pub(crate) fn range(&self, index: usize) -> Range<usize> {
        self.offset(index)..self.offset(index + 1)
    }

    pub(crate) fn ranges(self) -> impl Iterator<Item = Range<usize>> {
        (0..self.batches).map(move |index| self.range(index))
    }

    fn offset(&self, index: usize) -> usize {
        (index as u128 * self.len as u128 / self.batches as u128) as usize
    }
}

/// First failure seen while gathering, by batch order
enum Failure<E> {
    Error(E),
    Join(JoinError),
}

/// Await every batch in order and concatenate their outputs
async fn gather<B, E>(
    len: usize,
    batches: Vec<JoinHandle<Result<Vec<B>, E>>>,
) -> Result<Vec<B>, E> {
    let mut output = Vec::with_capacity(len);
    let mut failure = None;

    for handle in batches {
        let outcome = handle.await;
        if failure.is_some() {
            continue;
        }
        match outcome {
            Ok(Ok(results)) => output.extend(results),
            Ok(Err(err)) => failure = Some(Failure::Error(err)),
            Err(err) => failure = Some(Failure::Join(err)),
        }
    }

    match failure {
        None => {
            debug_assert_eq!(output.len(), len);
            Ok(output)
        }
        Some(Failure::Error(err)) => Err(err),
        Some(Failure::Join(err)) => err.resume(),
    }
}

fn infallible<B>(result: Result<Vec<B>, Infallible>) -> Vec<B> {
    match result {
        Ok(output) => output,
        Err(never) => match never {},
    }
}

/// Map `transform` over `items` in parallel, preserving order
///
/// With fewer than two batches the transform runs sequentially on the
/// caller. Otherwise each batch runs as its own task on the current
/// scheduler, inheriting the caller's priority.
///
/// # Panics
/// Panics if `min_batch_size` is zero, and re-raises a panic from `transform`.
pub async fn concurrent_map<T, B, F>(
    items: impl Into<Arc<[T]>>,
    min_batch_size: usize,
    transform: F,
) -> Vec<B>
where
    T: Send + Sync + 'static,
    B: Send + 'static,
    F: Fn(&T) -> B + Send + Sync + 'static,
{
    let items: Arc<[T]> = items.into();
    let plan = BatchPlan::new(items.len(), min_batch_size);
    if !plan.is_parallel() {
        return items.iter().map(&transform).collect();
    }
    tracing::trace!(items = items.len(), batches = plan.batch_count(), "concurrent map");

    let transform = Arc::new(transform);
    let batches: Vec<JoinHandle<Result<Vec<B>, Infallible>>> = plan
        .ranges()
        .map(|range| {
            let items = items.clone();
            let transform = transform.clone();
            spawn(async move { Ok(items[range].iter().map(|item| transform(item)).collect()) })
        })
        .collect();

    infallible(gather(items.len(), batches).await)
}

/// Like [`concurrent_map`], for a transform that suspends
///
/// With fewer than two batches every element gets its own task.
pub async fn concurrent_map_async<T, B, F, Fut>(
    items: impl Into<Arc<[T]>>,
    min_batch_size: usize,
    transform: F,
) -> Vec<B>
where
    T: Send + Sync + 'static,
    B: Send + 'static,
    F: Fn(&T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = B> + Send + 'static,
{
    let result = try_concurrent_map(items, min_batch_size, move |item| {
        let future = transform(item);
        async move { Ok::<_, Infallible>(future.await) }
    })
    .await;
    match result {
        Ok(output) => output,
        Err(never) => match never {},
    }
}

/// Like [`concurrent_map_async`], for a fallible transform
///
/// A batch stops at its first error. All batches are awaited, then the error
/// of the earliest failed batch is returned.
pub async fn try_concurrent_map<T, B, E, F, Fut>(
    items: impl Into<Arc<[T]>>,
    min_batch_size: usize,
    transform: F,
) -> Result<Vec<B>, E>
where
    T: Send + Sync + 'static,
    B: Send + 'static,
    E: Send + 'static,
    F: Fn(&T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B, E>> + Send + 'static,
{
    let items: Arc<[T]> = items.into();
    let plan = BatchPlan::new(items.len(), min_batch_size);
    let transform = Arc::new(transform);

    let batches: Vec<JoinHandle<Result<Vec<B>, E>>> = if plan.is_parallel() {
        tracing::trace!(items = items.len(), batches = plan.batch_count(), "concurrent map");
        plan.ranges()
            .map(|range| {
                let items = items.clone();
                let transform = transform.clone();
                spawn(async move {
                    let mut results = Vec::with_capacity(range.len());
                    for item in &items[range] {
                        match transform(item).await {
                            Ok(result) => results.push(result),
                            Err(err) => return Err(err),
                        }
                    }
                    Ok(results)
                })
            })
            .collect()
    } else {
        (0..items.len())
            .map(|index| {
                let future = transform(&items[index]);
                spawn(async move { future.await.map(|result| vec![result]) })
            })
            .collect()
    };

    gather(items.len(), batches).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_runtime::{Scheduler, SchedulerConfig};

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default().with_worker_threads(4)).unwrap()
    }

    #[test]
    fn test_batch_plan_ranges() {
        let plan = BatchPlan::new(10, 3);
        assert_eq!(plan.batch_count(), 4);
        let ranges: Vec<_> = plan.ranges().collect();
        assert_eq!(ranges, vec![0..2, 2..5, 5..7, 7..10]);
    }

    #[test]
    fn test_batch_plan_small_inputs() {
        assert_eq!(BatchPlan::new(0, 4096).batch_count(), 0);
        assert!(!BatchPlan::new(4096, 4096).is_parallel());
        assert!(BatchPlan::new(4097, 4096).is_parallel());
    }

    #[test]
    #[should_panic(expected = "min_batch_size must be at least 1")]
    fn test_zero_batch_size_panics() {
        BatchPlan::new(1, 0);
    }

    #[test]
    fn test_batch_ranges_cover_input() {
        for len in [1usize, 2, 7, 100, 1_001] {
            for min in [1usize, 2, 3, 10, 1_000] {
                let plan = BatchPlan::new(len, min);
                let mut next = 0;
                for range in plan.ranges() {
                    assert_eq!(range.start, next);
                    assert!(range.end >= range.start);
                    next = range.end;
                }
                assert_eq!(next, len, "len={} min={}", len, min);
            }
        }
    }

    #[test]
    fn test_concurrent_map_sequential_path() {
        let scheduler = scheduler();
        let output = scheduler.block_on(concurrent_map(vec![1, 2, 3], 4096, |x: &i32| x * 10));
        assert_eq!(output, vec![10, 20, 30]);
    }

    #[test]
    fn test_concurrent_map_batched_preserves_order() {
        let scheduler = scheduler();
        let items: Vec<u64> = (0..1_000).collect();
        let output = scheduler.block_on(concurrent_map(items, 7, |x: &u64| x * x));
        assert_eq!(output, (0..1_000u64).map(|x| x * x).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_map_async_per_element() {
        let scheduler = scheduler();
        let mapped = concurrent_map_async(vec![3u32, 1, 2], 4096, |x: &u32| {
            let x = *x;
            async move {
                strand_runtime::yield_now().await;
                x + 1
            }
        });
        let output = scheduler.block_on(mapped);
        assert_eq!(output, vec![4, 2, 3]);
    }

    #[test]
    fn test_try_concurrent_map_reports_first_batch_error() {
        let scheduler = scheduler();
        let items: Vec<i32> = (0..100).collect();
        let result = scheduler.block_on(try_concurrent_map(items, 10, |x: &i32| {
            let x = *x;
            async move {
                if x == 35 || x == 85 {
                    Err(x)
                } else {
                    Ok(x)
                }
            }
        }));
        assert_eq!(result, Err(35));
    }
}
