//! Retry strategy.
//!
//! Re-invokes the inner strategies on classified failures, up to `max_retries`
//! extra attempts and within a total `max_duration` budget that includes the
//! upcoming delay. Exhaustion rethrows the original error. Async retries
//! schedule their delay without blocking the caller; sync retries sleep on the
//! caller thread.

use crate::backoff::Backoff;
use crate::classifier::{Classification, ErrorClassifier};
use crate::jitter::Jitter;
use crate::metrics::{run_callbacks, run_callbacks_with, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::sleeper::{BlockingSleeper, Sleeper, ThreadSleeper, TokioSleeper};
use crate::FaultToleranceError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct Retry<E> {
    enabled: bool,
    max_retries: u32,
    max_duration: Duration,
    backoff: Backoff,
    jitter: Jitter,
    // apply set = retry_on, skip set = abort_on; only Apply retries.
    classifier: ErrorClassifier<E>,
    sleeper: Arc<dyn Sleeper>,
    blocking_sleeper: Arc<dyn BlockingSleeper>,
    sink: Arc<dyn MetricsSink>,
    on_retry: Vec<Arc<dyn Fn(u32) + Send + Sync>>,
    on_exhausted: Vec<Callback>,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            max_retries: self.max_retries,
            max_duration: self.max_duration,
            backoff: self.backoff.clone(),
            jitter: self.jitter.clone(),
            classifier: self.classifier.clone(),
            sleeper: self.sleeper.clone(),
            blocking_sleeper: self.blocking_sleeper.clone(),
            sink: self.sink.clone(),
            on_retry: self.on_retry.clone(),
            on_exhausted: self.on_exhausted.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Retry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("max_duration", &self.max_duration)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<E> Retry<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        max_retries: u32,
        max_duration: Duration,
        backoff: Backoff,
        jitter: Jitter,
        classifier: ErrorClassifier<E>,
        sleeper: Arc<dyn Sleeper>,
        blocking_sleeper: Arc<dyn BlockingSleeper>,
        sink: Arc<dyn MetricsSink>,
        on_retry: Vec<Arc<dyn Fn(u32) + Send + Sync>>,
        on_exhausted: Vec<Callback>,
    ) -> Self {
        Self {
            enabled: true,
            max_retries,
            max_duration,
            backoff,
            jitter,
            classifier,
            sleeper,
            blocking_sleeper,
            sink,
            on_retry,
            on_exhausted,
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            max_duration: Duration::ZERO,
            backoff: Backoff::constant(Duration::ZERO),
            jitter: Jitter::None,
            classifier: ErrorClassifier::apply_to_all(),
            sleeper: Arc::new(TokioSleeper),
            blocking_sleeper: Arc::new(ThreadSleeper),
            sink: Arc::new(NullSink),
            on_retry: Vec::new(),
            on_exhausted: Vec::new(),
        }
    }

    /// Decide whether to retry after the given failure; returns the delay to
    /// wait, or `None` to rethrow. `failures` counts failed attempts so far.
    fn next_delay(
        &self,
        err: &FaultToleranceError<E>,
        failures: u32,
        started: Instant,
    ) -> Option<Duration> {
        if self.classifier.classify(err) != Classification::Apply {
            return None;
        }
        if failures > self.max_retries {
            tracing::debug!(attempts = failures, "retries exhausted");
            self.sink.record(MetricsEvent::RetryExhausted { attempts: failures });
            run_callbacks("retry.exhausted", &self.on_exhausted);
            return None;
        }
        let last: &(dyn std::error::Error + 'static) = err;
        let delay = self.jitter.apply(self.backoff.delay_for(failures, Some(last)));
        if !self.max_duration.is_zero() && started.elapsed() + delay >= self.max_duration {
            return None;
        }
        self.sink.record(MetricsEvent::RetryAttempt { attempt: failures, delay });
        run_callbacks_with("retry.attempt", &self.on_retry, failures);
        Some(delay)
    }

    pub(crate) async fn execute<T, Fut, Op>(&self, mut op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if !self.enabled {
            return op().await;
        }

        let started = Instant::now();
        let mut failures: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    failures += 1;
                    match self.next_delay(&err, failures, started) {
                        Some(delay) => self.sleeper.sleep(delay).await,
                        None => return Err(err),
                    }
                }
            }
        }
    }

    pub(crate) fn execute_blocking<T, Op>(&self, mut op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnMut() -> Result<T, FaultToleranceError<E>>,
    {
        if !self.enabled {
            return op();
        }

        let started = Instant::now();
        let mut failures: u32 = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    failures += 1;
                    match self.next_delay(&err, failures, started) {
                        Some(delay) => self.blocking_sleeper.sleep(delay),
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CauseChainMode, ErrorMatcher};
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn retry(max_retries: u32) -> Retry<TestError> {
        Retry::new(
            max_retries,
            Duration::ZERO,
            Backoff::constant(Duration::from_millis(10)),
            Jitter::None,
            ErrorClassifier::apply_to_all(),
            Arc::new(InstantSleeper),
            Arc::new(InstantSleeper),
            Arc::new(NullSink),
            Vec::new(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn success_on_first_attempt_invokes_once() {
        let policy = retry(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FaultToleranceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_runs_max_retries_plus_one_and_rethrows_original() {
        let policy = retry(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FaultToleranceError::Inner(TestError(format!("attempt {n}"))))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4, "maxRetries=3 means 4 invocations");
        match result.unwrap_err() {
            FaultToleranceError::Inner(e) => assert_eq!(e.0, "attempt 3"),
            e => panic!("expected the original error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = retry(5);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FaultToleranceError::Inner(TestError("transient".into())))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abort_on_rethrows_immediately() {
        let policy = Retry::new(
            5,
            Duration::ZERO,
            Backoff::constant(Duration::from_millis(10)),
            Jitter::None,
            ErrorClassifier::new(
                vec![ErrorMatcher::any()],
                vec![ErrorMatcher::inner(|e: &TestError| e.0 == "fatal")],
                CauseChainMode::Strict,
            ),
            Arc::new(InstantSleeper),
            Arc::new(InstantSleeper),
            Arc::new(NullSink),
            Vec::new(),
            Vec::new(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FaultToleranceError::Inner(TestError("fatal".into())))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_retry_on_rethrows_immediately() {
        let policy = Retry::new(
            5,
            Duration::ZERO,
            Backoff::constant(Duration::from_millis(10)),
            Jitter::None,
            ErrorClassifier::new(
                vec![ErrorMatcher::inner(|e: &TestError| e.0 == "retryable")],
                Vec::new(),
                CauseChainMode::Strict,
            ),
            Arc::new(InstantSleeper),
            Arc::new(InstantSleeper),
            Arc::new(NullSink),
            Vec::new(),
            Vec::new(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FaultToleranceError::Inner(TestError("other".into())))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn strategy_errors_are_retried_by_default() {
        let policy = retry(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), FaultToleranceError<TestError>>(FaultToleranceError::Timeout {
                        elapsed: Duration::from_secs(2),
                        timeout: Duration::from_secs(1),
                    })
                }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_schedule_reaches_the_sleeper() {
        let sleeper = TrackingSleeper::new();
        let policy: Retry<TestError> = Retry::new(
            3,
            Duration::ZERO,
            Backoff::exponential(Duration::from_millis(100)),
            Jitter::None,
            ErrorClassifier::apply_to_all(),
            Arc::new(sleeper.clone()),
            Arc::new(InstantSleeper),
            Arc::new(NullSink),
            Vec::new(),
            Vec::new(),
        );

        let _ = policy
            .execute(|| async {
                Err::<(), _>(FaultToleranceError::Inner(TestError("always".into())))
            })
            .await;

        assert_eq!(sleeper.calls(), 3);
        assert_eq!(sleeper.call_at(0).unwrap(), Duration::from_millis(100));
        assert_eq!(sleeper.call_at(1).unwrap(), Duration::from_millis(200));
        assert_eq!(sleeper.call_at(2).unwrap(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn duration_budget_includes_the_upcoming_delay() {
        let policy: Retry<TestError> = Retry::new(
            10,
            Duration::from_millis(50),
            Backoff::constant(Duration::from_millis(100)),
            Jitter::None,
            ErrorClassifier::apply_to_all(),
            Arc::new(InstantSleeper),
            Arc::new(InstantSleeper),
            Arc::new(NullSink),
            Vec::new(),
            Vec::new(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_op.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FaultToleranceError::Inner(TestError("slow".into())))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "a 100ms delay cannot fit a 50ms budget, so no retry happens"
        );
    }

    #[test]
    fn blocking_retry_counts_attempts_the_same_way() {
        let policy = retry(3);
        let mut attempts = 0;

        let result: Result<(), _> = policy.execute_blocking(|| {
            attempts += 1;
            Err(FaultToleranceError::Inner(TestError("always".into())))
        });

        assert!(result.is_err());
        assert_eq!(attempts, 4);
    }

    #[tokio::test]
    async fn retry_callbacks_and_metrics_fire_per_attempt() {
        let sink = crate::metrics::MemorySink::new();
        let retried = Arc::new(AtomicUsize::new(0));
        let retried_cb = retried.clone();
        let policy: Retry<TestError> = Retry::new(
            2,
            Duration::ZERO,
            Backoff::constant(Duration::from_millis(1)),
            Jitter::None,
            ErrorClassifier::apply_to_all(),
            Arc::new(InstantSleeper),
            Arc::new(InstantSleeper),
            Arc::new(sink.clone()),
            vec![Arc::new(move |_| {
                retried_cb.fetch_add(1, Ordering::SeqCst);
            })],
            Vec::new(),
        );

        let _ = policy
            .execute(|| async {
                Err::<(), _>(FaultToleranceError::Inner(TestError("always".into())))
            })
            .await;

        assert_eq!(retried.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.count_matching(|e| matches!(e, MetricsEvent::RetryAttempt { .. })),
            2
        );
        assert_eq!(
            sink.count_matching(|e| matches!(e, MetricsEvent::RetryExhausted { .. })),
            1
        );
    }
}
