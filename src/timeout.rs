//! Timeout strategy.
//!
//! Async mode races the inner future against a timer; whichever side loses is
//! dropped, which cancels it. Sync mode cannot preempt the caller thread, so
//! the deadline is checked when the inner call returns and late completions
//! are converted to timeouts, success or not.

use crate::metrics::{run_callbacks, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::FaultToleranceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
pub(crate) struct Timeout {
    duration: Option<Duration>,
    sink: Arc<dyn MetricsSink>,
    on_timeout: Vec<Callback>,
    on_finished: Vec<Callback>,
}

impl std::fmt::Debug for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeout").field("duration", &self.duration).finish()
    }
}

impl Timeout {
    pub(crate) fn new(
        duration: Duration,
        sink: Arc<dyn MetricsSink>,
        on_timeout: Vec<Callback>,
        on_finished: Vec<Callback>,
    ) -> Self {
        Self { duration: Some(duration), sink, on_timeout, on_finished }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            duration: None,
            sink: Arc::new(NullSink),
            on_timeout: Vec::new(),
            on_finished: Vec::new(),
        }
    }

    fn finished(&self, elapsed: Duration) {
        self.sink.record(MetricsEvent::TimeoutSucceeded { elapsed });
        run_callbacks("timeout.finished", &self.on_finished);
    }

    fn timed_out<T, E>(&self, elapsed: Duration, limit: Duration) -> Result<T, FaultToleranceError<E>> {
        tracing::debug!(?elapsed, limit = ?limit, "invocation timed out");
        self.sink.record(MetricsEvent::TimeoutTimedOut { elapsed });
        run_callbacks("timeout.timed_out", &self.on_timeout);
        Err(FaultToleranceError::Timeout { elapsed, timeout: limit })
    }

    pub(crate) async fn execute<T, E, Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let limit = match self.duration {
            Some(limit) => limit,
            None => return op().await,
        };

        let start = Instant::now();
        match tokio::time::timeout(limit, op()).await {
            Ok(result) => {
                self.finished(start.elapsed());
                result
            }
            Err(_) => self.timed_out(start.elapsed(), limit),
        }
    }

    pub(crate) fn execute_blocking<T, E, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnOnce() -> Result<T, FaultToleranceError<E>>,
    {
        let limit = match self.duration {
            Some(limit) => limit,
            None => return op(),
        };

        let start = std::time::Instant::now();
        let result = op();
        let elapsed = start.elapsed();
        if elapsed > limit {
            // Late completions count as timeouts, even successful ones.
            self.timed_out(elapsed, limit)
        } else {
            self.finished(elapsed);
            result
        }
    }
}
