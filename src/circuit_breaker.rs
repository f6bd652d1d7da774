//! Circuit-breaker strategy.
//!
//! Outcomes are recorded in a fixed-size rolling window of booleans. Once the
//! window is full, a failure ratio strictly above the configured threshold
//! trips the breaker OPEN. After the delay elapses the next attempt is
//! admitted as a trial (HALF_OPEN); `success_threshold` consecutive successes
//! close the breaker and clear the window, any failure reopens it and
//! restarts the delay.
//!
//! State lives behind a single mutex. State-change, success, failure, and
//! prevented callbacks are always invoked outside it.

use crate::classifier::{Classification, ErrorClassifier};
use crate::clock::Clock;
use crate::metrics::{run_callbacks, run_transition_callbacks, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::FaultToleranceError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Externally observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

pub(crate) type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct CircuitBreakerConfig {
    pub(crate) request_volume_threshold: usize,
    pub(crate) failure_ratio: f64,
    pub(crate) delay: Duration,
    pub(crate) success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            failure_ratio: 0.5,
            delay: Duration::from_secs(5),
            success_threshold: 1,
        }
    }
}

/// Fixed-size ring of recent outcomes; `true` records a failure.
#[derive(Debug)]
struct RollingOutcomes {
    ring: Vec<bool>,
    idx: usize,
    len: usize,
    failures: usize,
}

impl RollingOutcomes {
    fn new(size: usize) -> Self {
        Self { ring: vec![false; size], idx: 0, len: 0, failures: 0 }
    }

    fn record(&mut self, failure: bool) {
        if self.len == self.ring.len() {
            if self.ring[self.idx] {
                self.failures -= 1;
            }
        } else {
            self.len += 1;
        }
        self.ring[self.idx] = failure;
        if failure {
            self.failures += 1;
        }
        self.idx = (self.idx + 1) % self.ring.len();
    }

    fn is_full(&self) -> bool {
        self.len == self.ring.len()
    }

    fn failure_ratio(&self) -> f64 {
        self.failures as f64 / self.ring.len() as f64
    }

    fn reset(&mut self) {
        self.ring.fill(false);
        self.idx = 0;
        self.len = 0;
        self.failures = 0;
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: RollingOutcomes,
    opened_at: u64,
    half_open_successes: u32,
}

/// State shared between the strategy and the maintenance registry: the
/// breaker proper plus its state-change subscribers.
pub(crate) struct BreakerCore {
    inner: Mutex<BreakerInner>,
    on_state_change: Mutex<Vec<StateChangeCallback>>,
}

impl std::fmt::Debug for BreakerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerCore").field("state", &self.current_state()).finish()
    }
}

impl BreakerCore {
    pub(crate) fn new(window_size: usize) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: RollingOutcomes::new(window_size),
                opened_at: 0,
                half_open_successes: 0,
            }),
            on_state_change: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Force the breaker back to CLOSED with an empty window.
    pub(crate) fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.window.reset();
            inner.half_open_successes = 0;
            inner.opened_at = 0;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        if let Some((from, to)) = transition {
            self.fire_state_change(from, to);
        }
    }

    pub(crate) fn subscribe(&self, cb: StateChangeCallback) {
        self.on_state_change.lock().unwrap_or_else(|p| p.into_inner()).push(cb);
    }

    fn fire_state_change(&self, from: CircuitState, to: CircuitState) {
        let callbacks =
            self.on_state_change.lock().unwrap_or_else(|p| p.into_inner()).clone();
        run_transition_callbacks(&callbacks, from, to);
    }
}

pub(crate) struct CircuitBreaker<E> {
    enabled: bool,
    core: Arc<BreakerCore>,
    config: CircuitBreakerConfig,
    classifier: ErrorClassifier<E>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn MetricsSink>,
    on_success: Vec<Callback>,
    on_failure: Vec<Callback>,
    on_prevented: Vec<Callback>,
    name: Option<String>,
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            core: self.core.clone(),
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
            on_prevented: self.on_prevented.clone(),
            name: self.name.clone(),
        }
    }
}

impl<E> std::fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("enabled", &self.enabled)
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<E> CircuitBreaker<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: Arc<BreakerCore>,
        config: CircuitBreakerConfig,
        classifier: ErrorClassifier<E>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn MetricsSink>,
        on_success: Vec<Callback>,
        on_failure: Vec<Callback>,
        on_prevented: Vec<Callback>,
        name: Option<String>,
    ) -> Self {
        Self {
            enabled: true,
            core,
            config,
            classifier,
            clock,
            sink,
            on_success,
            on_failure,
            on_prevented,
            name,
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            core: Arc::new(BreakerCore::new(1)),
            config: CircuitBreakerConfig::default(),
            classifier: ErrorClassifier::apply_to_all(),
            clock: Arc::new(crate::clock::MonotonicClock::default()),
            sink: Arc::new(NullSink),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            on_prevented: Vec::new(),
            name: None,
        }
    }

    pub(crate) async fn execute<T, Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        if !self.enabled {
            return op().await;
        }
        self.try_admit()?;
        let result = op().await;
        self.observe(&result);
        result
    }

    pub(crate) fn execute_blocking<T, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnOnce() -> Result<T, FaultToleranceError<E>>,
    {
        if !self.enabled {
            return op();
        }
        self.try_admit()?;
        let result = op();
        self.observe(&result);
        result
    }

    fn try_admit(&self) -> Result<(), FaultToleranceError<E>> {
        let now = self.clock.now_millis();
        let delay_millis = self.config.delay.as_millis() as u64;
        let mut transition = None;
        let rejection = {
            let mut inner = self.core.inner.lock().unwrap_or_else(|p| p.into_inner());
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => None,
                CircuitState::Open => {
                    let elapsed = now.saturating_sub(inner.opened_at);
                    if elapsed >= delay_millis {
                        // Delay expired: this attempt is the trial invocation.
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_successes = 0;
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        None
                    } else {
                        Some(Duration::from_millis(delay_millis - elapsed))
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            tracing::info!(name = self.name.as_deref(), %from, %to, "circuit breaker admits trial");
            self.sink.record(MetricsEvent::CircuitBreakerStateChange { from, to });
            self.core.fire_state_change(from, to);
        }

        match rejection {
            None => Ok(()),
            Some(remaining) => {
                tracing::debug!(name = self.name.as_deref(), ?remaining, "circuit breaker prevented invocation");
                self.sink.record(MetricsEvent::CircuitBreakerPrevented);
                run_callbacks("circuit_breaker.prevented", &self.on_prevented);
                Err(FaultToleranceError::CircuitBreakerOpen { remaining })
            }
        }
    }

    fn observe<T>(&self, result: &Result<T, FaultToleranceError<E>>) {
        let failure = match result {
            Ok(_) => false,
            // "Skip" means treat as success.
            Err(err) => self.classifier.classify(err) == Classification::Apply,
        };
        self.record_outcome(failure);
    }

    fn record_outcome(&self, failure: bool) {
        let now = self.clock.now_millis();
        let transition = {
            let mut inner = self.core.inner.lock().unwrap_or_else(|p| p.into_inner());
            match inner.state {
                CircuitState::Closed => {
                    inner.window.record(failure);
                    if inner.window.is_full()
                        && inner.window.failure_ratio() > self.config.failure_ratio
                    {
                        inner.state = CircuitState::Open;
                        inner.opened_at = now;
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if failure {
                        inner.state = CircuitState::Open;
                        inner.opened_at = now;
                        Some((CircuitState::HalfOpen, CircuitState::Open))
                    } else {
                        inner.half_open_successes += 1;
                        if inner.half_open_successes >= self.config.success_threshold {
                            inner.state = CircuitState::Closed;
                            inner.window.reset();
                            inner.half_open_successes = 0;
                            Some((CircuitState::HalfOpen, CircuitState::Closed))
                        } else {
                            None
                        }
                    }
                }
                // An in-flight invocation finishing after the breaker opened
                // has no window to land in.
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            match to {
                CircuitState::Open => {
                    tracing::warn!(name = self.name.as_deref(), %from, %to, "circuit breaker opened")
                }
                _ => tracing::info!(name = self.name.as_deref(), %from, %to, "circuit breaker state change"),
            }
            self.sink.record(MetricsEvent::CircuitBreakerStateChange { from, to });
            self.core.fire_state_change(from, to);
        }

        if failure {
            self.sink.record(MetricsEvent::CircuitBreakerFailure);
            run_callbacks("circuit_breaker.failure", &self.on_failure);
        } else {
            self.sink.record(MetricsEvent::CircuitBreakerSuccess);
            run_callbacks("circuit_breaker.success", &self.on_success);
        }
    }
}
