//! Thread-offload strategy: move the rest of the pipeline onto an executor.
//!
//! Only meaningful for async pipelines. When enabled, every invocation is
//! scheduled through the configured [`AsyncExecutor`]; when disabled, the
//! invocation proceeds on the caller task. Dropping the guarded future before
//! completion cancels the offloaded task.

use crate::FaultToleranceError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// The executor refused to accept a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("executor rejected the task")]
pub struct RejectedExecution;

/// Executor contract used by thread-offload. Implementations schedule the
/// erased task or refuse it.
pub trait AsyncExecutor: Send + Sync + std::fmt::Debug {
    fn spawn_task(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution>;
}

/// Default executor backed by `tokio::spawn`. Never rejects.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl AsyncExecutor for TokioExecutor {
    fn spawn_task(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution> {
        tokio::spawn(task);
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct Offload {
    enabled: bool,
    executor: Arc<dyn AsyncExecutor>,
}

impl std::fmt::Debug for Offload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offload").field("enabled", &self.enabled).finish()
    }
}

impl Offload {
    pub(crate) fn new(executor: Arc<dyn AsyncExecutor>) -> Self {
        Self { enabled: true, executor }
    }

    pub(crate) fn disabled() -> Self {
        Self { enabled: false, executor: Arc::new(TokioExecutor) }
    }

    pub(crate) async fn execute<T, E, Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send + 'static,
        Op: FnOnce() -> Fut + Send,
    {
        if !self.enabled {
            return op().await;
        }

        let fut = op();
        let (tx, rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let task = async move {
            tokio::select! {
                _ = cancel_rx => {}
                out = fut => {
                    let _ = tx.send(out);
                }
            }
        };

        if self.executor.spawn_task(Box::pin(task)).is_err() {
            tracing::warn!("executor rejected offloaded invocation");
            return Err(FaultToleranceError::ExecutionRejected);
        }

        // Holding the cancel sender until completion means dropping this
        // future cancels the offloaded task.
        let result = rx.await;
        drop(cancel_tx);
        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(FaultToleranceError::ExecutionRejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[derive(Debug)]
    struct RejectingExecutor;

    impl AsyncExecutor for RejectingExecutor {
        fn spawn_task(&self, _task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution> {
            Err(RejectedExecution)
        }
    }

    #[tokio::test]
    async fn offload_returns_the_inner_outcome() {
        let offload = Offload::new(Arc::new(TokioExecutor));
        let result = offload
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn disabled_offload_runs_inline() {
        let offload = Offload::disabled();
        let result = offload
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>("inline") })
            .await;
        assert_eq!(result.unwrap(), "inline");
    }

    #[tokio::test]
    async fn rejecting_executor_surfaces_execution_rejected() {
        let offload = Offload::new(Arc::new(RejectingExecutor));
        let result = offload
            .execute(|| async { Ok::<_, FaultToleranceError<TestError>>(1) })
            .await;
        assert!(matches!(result.unwrap_err(), FaultToleranceError::ExecutionRejected));
    }

    #[tokio::test]
    async fn dropping_the_guarded_future_cancels_the_task() {
        let offload = Offload::new(Arc::new(TokioExecutor));
        let completions = Arc::new(AtomicUsize::new(0));
        let completions_task = completions.clone();

        let fut = offload.execute(move || {
            let completions = completions_task.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                completions.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FaultToleranceError<TestError>>(())
            }
        });

        // Poll it once so the task is spawned, then drop it.
        tokio::select! {
            _ = fut => panic!("should not complete in 5ms"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 0, "task should have been cancelled");
    }

    #[tokio::test]
    async fn offload_propagates_errors() {
        let offload = Offload::new(Arc::new(TokioExecutor));
        let result = offload
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
