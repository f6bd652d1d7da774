//! Bulkhead strategy: bound concurrent invocations, optionally queueing async
//! callers.
//!
//! Synchronous invocations never wait: no permit means immediate rejection.
//! Asynchronous invocations may enqueue up to the configured queue size and are
//! granted permits strictly in arrival order. The permit is held until the
//! inner outcome is observed, not merely until the call returns.

use crate::metrics::{run_callbacks, run_callbacks_with, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::FaultToleranceError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub(crate) struct Bulkhead {
    enabled: bool,
    semaphore: Arc<Semaphore>,
    max: usize,
    queue_capacity: usize,
    queued: Arc<AtomicUsize>,
    sink: Arc<dyn MetricsSink>,
    on_accepted: Vec<Callback>,
    on_rejected: Vec<Callback>,
    on_queue_left: Vec<Arc<dyn Fn(Duration) + Send + Sync>>,
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("enabled", &self.enabled)
            .field("max", &self.max)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Bulkhead {
    pub(crate) fn new(
        max: usize,
        queue_capacity: usize,
        sink: Arc<dyn MetricsSink>,
        on_accepted: Vec<Callback>,
        on_rejected: Vec<Callback>,
        on_queue_left: Vec<Arc<dyn Fn(Duration) + Send + Sync>>,
    ) -> Self {
        Self {
            enabled: true,
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            queue_capacity,
            queued: Arc::new(AtomicUsize::new(0)),
            sink,
            on_accepted,
            on_rejected,
            on_queue_left,
        }
    }

    /// Pass-through bulkhead used when the strategy is not configured.
    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            semaphore: Arc::new(Semaphore::new(0)),
            max: 0,
            queue_capacity: 0,
            queued: Arc::new(AtomicUsize::new(0)),
            sink: Arc::new(NullSink),
            on_accepted: Vec::new(),
            on_rejected: Vec::new(),
            on_queue_left: Vec::new(),
        }
    }

    fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.semaphore.available_permits())
    }

    fn reject<T, E>(&self) -> Result<T, FaultToleranceError<E>> {
        let in_flight = self.in_flight();
        tracing::debug!(in_flight, max = self.max, "bulkhead rejected invocation");
        self.sink.record(MetricsEvent::BulkheadRejected { in_flight, max: self.max });
        run_callbacks("bulkhead.rejected", &self.on_rejected);
        Err(FaultToleranceError::BulkheadRejected { in_flight, max: self.max })
    }

    fn accepted(&self) {
        self.sink
            .record(MetricsEvent::BulkheadAccepted { in_flight: self.in_flight(), max: self.max });
        run_callbacks("bulkhead.accepted", &self.on_accepted);
    }

    pub(crate) async fn execute<T, E, Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        if !self.enabled {
            return op().await;
        }

        let permit = match self.semaphore.try_acquire() {
            Ok(permit) => {
                self.accepted();
                permit
            }
            Err(_) => {
                let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
                if waiting >= self.queue_capacity {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return self.reject();
                }
                let enqueued_at = Instant::now();
                // FIFO hand-off: released permits go to the longest waiter.
                let acquired = self.semaphore.acquire().await;
                self.queued.fetch_sub(1, Ordering::SeqCst);
                match acquired {
                    Ok(permit) => {
                        let wait = enqueued_at.elapsed();
                        self.sink.record(MetricsEvent::BulkheadQueueLeft { wait });
                        run_callbacks_with("bulkhead.queue_left", &self.on_queue_left, wait);
                        self.accepted();
                        permit
                    }
                    Err(_) => return self.reject(),
                }
            }
        };

        let result = op().await;
        drop(permit);
        result
    }

    pub(crate) fn execute_blocking<T, E, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnOnce() -> Result<T, FaultToleranceError<E>>,
    {
        if !self.enabled {
            return op();
        }

        let permit = match self.semaphore.try_acquire() {
            Ok(permit) => {
                self.accepted();
                permit
            }
            Err(_) => return self.reject(),
        };

        let result = op();
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn bulkhead(max: usize, queue: usize) -> Bulkhead {
        Bulkhead::new(max, queue, Arc::new(NullSink), Vec::new(), Vec::new(), Vec::new())
    }

    #[tokio::test]
    async fn allows_operations_within_limit() {
        let bulkhead = bulkhead(3, 0);
        for _ in 0..3 {
            let result = bulkhead
                .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(42) })
                .await;
            assert_eq!(result.unwrap(), 42);
        }
    }

    #[tokio::test]
    async fn rejects_when_at_capacity_with_no_queue() {
        let bulkhead = bulkhead(2, 0);
        let barrier = Arc::new(tokio::sync::Barrier::new(3));

        let mut handles = vec![];
        for _ in 0..2 {
            let bulkhead = bulkhead.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                bulkhead
                    .execute(|| {
                        let barrier = barrier.clone();
                        async move {
                            barrier.wait().await;
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, FaultToleranceError<TestError>>(42)
                        }
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = bulkhead
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(99) })
            .await;
        assert!(result.unwrap_err().is_bulkhead_rejected());

        barrier.wait().await;
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn queued_invocations_run_after_release() {
        let bulkhead = bulkhead(1, 1);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let holder = {
            let bulkhead = bulkhead.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| {
                        let gate = gate.clone();
                        async move {
                            let _ = gate.acquire().await;
                            Ok::<_, FaultToleranceError<TestError>>("held")
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;

        // This one should queue, then run once the holder releases.
        let queued = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async { Ok::<_, FaultToleranceError<TestError>>("queued") })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Queue is full now: a third invocation is rejected immediately.
        let rejected = bulkhead
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>("nope") })
            .await;
        assert!(rejected.unwrap_err().is_bulkhead_rejected());

        gate.add_permits(1);
        assert_eq!(holder.await.unwrap().unwrap(), "held");
        assert_eq!(queued.await.unwrap().unwrap(), "queued");
    }

    #[tokio::test]
    async fn queue_exit_emits_wait_time() {
        let sink = MemorySink::new();
        let bulkhead = Bulkhead::new(
            1,
            1,
            Arc::new(sink.clone()),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let holder = {
            let bulkhead = bulkhead.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| {
                        let gate = gate.clone();
                        async move {
                            let _ = gate.acquire().await;
                            Ok::<_, FaultToleranceError<TestError>>(())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.add_permits(1);
        let _ = holder.await.unwrap();
        let _ = queued.await.unwrap();

        assert_eq!(
            sink.count_matching(|e| matches!(e, MetricsEvent::BulkheadQueueLeft { .. })),
            1
        );
    }

    #[test]
    fn blocking_mode_rejects_immediately() {
        let bulkhead = bulkhead(1, 4);

        // Hold the only permit via a forgotten try_acquire.
        let permit = bulkhead.semaphore.try_acquire().unwrap();

        let result: Result<(), FaultToleranceError<TestError>> =
            bulkhead.execute_blocking(|| Ok(()));
        let err = result.unwrap_err();
        match err {
            FaultToleranceError::BulkheadRejected { in_flight, max } => {
                assert_eq!(in_flight, 1);
                assert_eq!(max, 1);
            }
            e => panic!("expected bulkhead rejection, got {:?}", e),
        }
        drop(permit);

        let result: Result<i32, FaultToleranceError<TestError>> =
            bulkhead.execute_blocking(|| Ok(7));
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn disabled_bulkhead_passes_through() {
        let bulkhead = Bulkhead::disabled();
        let result = bulkhead
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(1) })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn propagates_operation_errors() {
        let bulkhead = bulkhead(2, 0);
        let result = bulkhead
            .execute(|| async {
                Err::<(), _>(FaultToleranceError::Inner(TestError("boom".into())))
            })
            .await;
        match result.unwrap_err() {
            FaultToleranceError::Inner(e) => assert_eq!(e.0, "boom"),
            e => panic!("expected inner error, got {:?}", e),
        }
    }
}
