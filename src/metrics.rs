//! Metric events emitted by strategies and the sink contract that consumes them.
//!
//! The sink backends (counters, histograms, exporters) are external
//! collaborators; the core only pushes [`MetricsEvent`] values through a
//! [`MetricsSink`].

use crate::circuit_breaker::CircuitState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Structured event describing one strategy decision or outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsEvent {
    BulkheadAccepted { in_flight: usize, max: usize },
    BulkheadRejected { in_flight: usize, max: usize },
    BulkheadQueueLeft { wait: Duration },
    TimeoutSucceeded { elapsed: Duration },
    TimeoutTimedOut { elapsed: Duration },
    RateLimitDecision { permitted: bool },
    CircuitBreakerStateChange { from: CircuitState, to: CircuitState },
    CircuitBreakerSuccess,
    CircuitBreakerFailure,
    CircuitBreakerPrevented,
    RetryAttempt { attempt: u32, delay: Duration },
    RetryExhausted { attempts: u32 },
    FallbackApplied,
}

/// Consumer of metric events. Implementations must be cheap and non-blocking;
/// they are invoked on the guarded call path.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn record(&self, event: MetricsEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _event: MetricsEvent) {}
}

/// Sink that stores events in memory, for tests and local inspection.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<MetricsEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in arrival order.
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of events matching a predicate.
    pub fn count_matching<F: Fn(&MetricsEvent) -> bool>(&self, predicate: F) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, event: MetricsEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}

/// Sink that logs events at debug level via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, event: MetricsEvent) {
        tracing::debug!(?event, "fault tolerance metric");
    }
}

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// Run registered callbacks outside any strategy lock. A panicking callback is
/// logged and swallowed; it never affects the guarded invocation's outcome.
pub(crate) fn run_callbacks(event: &'static str, callbacks: &[Callback]) {
    for cb in callbacks {
        if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
            tracing::warn!(event, "event callback panicked; ignoring");
        }
    }
}

/// Circuit-breaker state-change subscribers, also panic-isolated.
pub(crate) fn run_transition_callbacks(
    callbacks: &[Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>],
    from: CircuitState,
    to: CircuitState,
) {
    for cb in callbacks {
        if catch_unwind(AssertUnwindSafe(|| cb(from, to))).is_err() {
            tracing::warn!("state-change callback panicked; ignoring");
        }
    }
}

/// Like [`run_callbacks`] but for callbacks taking an argument.
pub(crate) fn run_callbacks_with<A: Copy>(
    event: &'static str,
    callbacks: &[Arc<dyn Fn(A) + Send + Sync>],
    arg: A,
) {
    for cb in callbacks {
        if catch_unwind(AssertUnwindSafe(|| cb(arg))).is_err() {
            tracing::warn!(event, "event callback panicked; ignoring");
        }
    }
}
