use guardrail::{
    Backoff, ErrorMatcher, FaultTolerance, FaultToleranceError, InstantSleeper, PipelineBuilder,
    TrackingSleeper,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test error: {}", self.0)
    }
}

impl std::error::Error for TestError {}

#[tokio::test]
async fn always_failing_action_runs_four_times_and_surfaces_its_error() {
    let sleeper = TrackingSleeper::new();
    let pipeline = FaultTolerance::create_async::<(), TestError>()
        .with_retry()
        .max_retries(3)
        .backoff(Backoff::constant(Duration::from_millis(1000)))
        .jitter(Duration::ZERO)
        .max_duration(Duration::ZERO)
        .with_sleeper(sleeper.clone())
        .done()
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let result = pipeline
        .call(move || {
            let attempts = attempts_op.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError("classified-retry"))
            }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4, "maxRetries=3 means exactly 4 invocations");
    match result.unwrap_err() {
        FaultToleranceError::Inner(e) => assert_eq!(e.0, "classified-retry"),
        e => panic!("the original error must propagate, got {:?}", e),
    }

    assert_eq!(sleeper.calls(), 3);
    assert_eq!(sleeper.call_at(0).unwrap(), Duration::from_millis(1000));
}

#[tokio::test]
async fn abort_on_wins_over_retry_on() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let pipeline = FaultTolerance::create_async::<(), TestError>()
        .with_retry()
        .max_retries(5)
        .backoff(Backoff::constant(Duration::ZERO))
        .jitter(Duration::ZERO)
        .retry_on(ErrorMatcher::any())
        .abort_on(ErrorMatcher::inner(|e: &TestError| e.0 == "fatal"))
        .with_sleeper(InstantSleeper)
        .done()
        .build()
        .unwrap();

    let result = pipeline
        .call(move || {
            let attempts = attempts_op.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError("fatal"))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_recovers_from_timeouts_when_configured() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let pipeline = FaultTolerance::create_async::<&'static str, TestError>()
        .with_retry()
        .max_retries(2)
        .backoff(Backoff::constant(Duration::ZERO))
        .jitter(Duration::ZERO)
        .retry_on(ErrorMatcher::timeout())
        .with_sleeper(InstantSleeper)
        .done()
        .with_timeout()
        .duration(Duration::from_millis(50))
        .done()
        .build()
        .unwrap();

    let result = pipeline
        .call(move || {
            let attempts = attempts_op.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok("recovered")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn sync_retry_scenario_matches_the_async_one() {
    let pipeline = FaultTolerance::create::<(), TestError>()
        .with_retry()
        .max_retries(3)
        .backoff(Backoff::constant(Duration::ZERO))
        .jitter(Duration::ZERO)
        .with_blocking_sleeper(InstantSleeper)
        .done()
        .build()
        .unwrap();

    let mut attempts = 0;
    let result = pipeline.call(|| {
        attempts += 1;
        Err::<(), _>(TestError("classified-retry"))
    });

    assert_eq!(attempts, 4);
    match result.unwrap_err() {
        FaultToleranceError::Inner(e) => assert_eq!(e.0, "classified-retry"),
        e => panic!("the original error must propagate, got {:?}", e),
    }
}

#[tokio::test]
async fn fibonacci_backoff_reaches_the_sleeper_in_order() {
    let sleeper = TrackingSleeper::new();
    let pipeline = FaultTolerance::create_async::<(), TestError>()
        .with_retry()
        .max_retries(5)
        .backoff(Backoff::fibonacci(Duration::from_millis(100)))
        .jitter(Duration::ZERO)
        .with_sleeper(sleeper.clone())
        .done()
        .build()
        .unwrap();

    let _ = pipeline
        .call(|| async { Err::<(), _>(TestError("always")) })
        .await;

    assert_eq!(sleeper.calls(), 5);
    assert_eq!(sleeper.call_at(0).unwrap(), Duration::from_millis(100));
    assert_eq!(sleeper.call_at(1).unwrap(), Duration::from_millis(100));
    assert_eq!(sleeper.call_at(2).unwrap(), Duration::from_millis(200));
    assert_eq!(sleeper.call_at(3).unwrap(), Duration::from_millis(300));
    assert_eq!(sleeper.call_at(4).unwrap(), Duration::from_millis(500));
}
