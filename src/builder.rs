//! Pipeline builders.
//!
//! [`FaultTolerance::create`] and [`FaultTolerance::create_async`] open a
//! builder; each strategy is configured through a sub-builder closed by
//! `done()`. Strategies compose in the canonical order no matter the order
//! they were configured in. Validation failures surface as
//! [`DefinitionError`] from `build()`.

use crate::backoff::Backoff;
use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::{
    BreakerCore, CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChangeCallback,
};
use crate::classifier::{CauseChainMode, ErrorClassifier, ErrorMatcher};
use crate::clock::{Clock, MonotonicClock};
use crate::config::RuntimeConfig;
use crate::fallback::{Fallback, HandlerFn, TypedHandler};
use crate::jitter::Jitter;
use crate::maintenance::{CircuitBreakerMaintenance, RegistrationGuard};
use crate::metrics::{Callback, MetricsSink, NullSink};
use crate::offload::{AsyncExecutor, Offload, TokioExecutor};
use crate::pipeline::{Pipeline, Strategies, SyncPipeline};
use crate::rate_limit::{RateLimit, RateLimitType};
use crate::retry::Retry;
use crate::sleeper::{BlockingSleeper, Sleeper, ThreadSleeper, TokioSleeper};
use crate::timeout::Timeout;
use crate::{DefinitionError, FaultToleranceError};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Entry points for building guarded pipelines.
pub struct FaultTolerance;

impl FaultTolerance {
    /// Builder for a synchronous pipeline.
    pub fn create<T, E>() -> SyncPipelineBuilder<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncPipelineBuilder { core: CoreSettings::new() }
    }

    /// Builder for an asynchronous pipeline.
    pub fn create_async<T, E>() -> AsyncPipelineBuilder<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AsyncPipelineBuilder { core: CoreSettings::new() }
    }
}

struct BulkheadSettings {
    capacity: usize,
    queue_size: usize,
    on_accepted: Vec<Callback>,
    on_rejected: Vec<Callback>,
    on_queue_left: Vec<Arc<dyn Fn(Duration) + Send + Sync>>,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            capacity: 10,
            queue_size: 10,
            on_accepted: Vec::new(),
            on_rejected: Vec::new(),
            on_queue_left: Vec::new(),
        }
    }
}

struct CircuitBreakerSettings<E> {
    request_volume_threshold: usize,
    failure_ratio: f64,
    delay: Duration,
    success_threshold: u32,
    name: Option<String>,
    fail_on: Vec<ErrorMatcher<E>>,
    skip_on: Vec<ErrorMatcher<E>>,
    on_state_change: Vec<StateChangeCallback>,
    on_success: Vec<Callback>,
    on_failure: Vec<Callback>,
    on_prevented: Vec<Callback>,
}

impl<E> Default for CircuitBreakerSettings<E> {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            request_volume_threshold: defaults.request_volume_threshold,
            failure_ratio: defaults.failure_ratio,
            delay: defaults.delay,
            success_threshold: defaults.success_threshold,
            name: None,
            fail_on: Vec::new(),
            skip_on: Vec::new(),
            on_state_change: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            on_prevented: Vec::new(),
        }
    }
}

struct RateLimitSettings {
    limit: u64,
    window: Duration,
    min_spacing: Duration,
    window_type: RateLimitType,
    on_permitted: Vec<Callback>,
    on_rejected: Vec<Callback>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(1),
            min_spacing: Duration::ZERO,
            window_type: RateLimitType::Fixed,
            on_permitted: Vec::new(),
            on_rejected: Vec::new(),
        }
    }
}

struct RetrySettings<E> {
    max_retries: u32,
    max_duration: Duration,
    backoff: Backoff,
    jitter: Jitter,
    retry_on: Vec<ErrorMatcher<E>>,
    abort_on: Vec<ErrorMatcher<E>>,
    sleeper: Arc<dyn Sleeper>,
    blocking_sleeper: Arc<dyn BlockingSleeper>,
    on_retry: Vec<Arc<dyn Fn(u32) + Send + Sync>>,
    on_exhausted: Vec<Callback>,
}

impl<E> Default for RetrySettings<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_duration: Duration::from_secs(180),
            backoff: Backoff::constant(Duration::ZERO),
            jitter: Jitter::uniform(Duration::from_millis(200)),
            retry_on: Vec::new(),
            abort_on: Vec::new(),
            sleeper: Arc::new(TokioSleeper),
            blocking_sleeper: Arc::new(ThreadSleeper),
            on_retry: Vec::new(),
            on_exhausted: Vec::new(),
        }
    }
}

struct TimeoutSettings {
    duration: Duration,
    on_timeout: Vec<Callback>,
    on_finished: Vec<Callback>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { duration: Duration::from_secs(1), on_timeout: Vec::new(), on_finished: Vec::new() }
    }
}

struct FallbackSettings<T, E> {
    typed: Vec<TypedHandler<T, E>>,
    catch_all: Option<HandlerFn<T, E>>,
    apply_on: Vec<ErrorMatcher<E>>,
    skip_on: Vec<ErrorMatcher<E>>,
    deep_causes: bool,
    on_applied: Vec<Callback>,
}

impl<T, E> Default for FallbackSettings<T, E> {
    fn default() -> Self {
        Self {
            typed: Vec::new(),
            catch_all: None,
            apply_on: Vec::new(),
            skip_on: Vec::new(),
            deep_causes: false,
            on_applied: Vec::new(),
        }
    }
}

/// Accumulated configuration shared by the sync and async builders.
#[doc(hidden)]
pub struct CoreSettings<T, E> {
    bulkhead: Option<BulkheadSettings>,
    circuit_breaker: Option<CircuitBreakerSettings<E>>,
    rate_limit: Option<RateLimitSettings>,
    retry: Option<RetrySettings<E>>,
    timeout: Option<TimeoutSettings>,
    fallback: Option<FallbackSettings<T, E>>,
    offload: bool,
    executor: Arc<dyn AsyncExecutor>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    maintenance: CircuitBreakerMaintenance,
    runtime_config: Option<RuntimeConfig>,
}

impl<T, E> CoreSettings<T, E> {
    fn new() -> Self {
        Self {
            bulkhead: None,
            circuit_breaker: None,
            rate_limit: None,
            retry: None,
            timeout: None,
            fallback: None,
            offload: false,
            executor: Arc::new(TokioExecutor),
            sink: Arc::new(NullSink),
            clock: Arc::new(MonotonicClock::default()),
            maintenance: CircuitBreakerMaintenance::global().clone(),
            runtime_config: None,
        }
    }
}

/// Shared surface of [`SyncPipelineBuilder`] and [`AsyncPipelineBuilder`].
pub trait PipelineBuilder<T, E>: Sized
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut CoreSettings<T, E>;

    fn with_bulkhead(self) -> BulkheadBuilder<Self, T, E> {
        BulkheadBuilder { parent: self, settings: BulkheadSettings::default(), _marker: PhantomData }
    }

    fn with_circuit_breaker(self) -> CircuitBreakerBuilder<Self, T, E> {
        CircuitBreakerBuilder {
            parent: self,
            settings: CircuitBreakerSettings::default(),
            _marker: PhantomData,
        }
    }

    fn with_rate_limit(self) -> RateLimitBuilder<Self, T, E> {
        RateLimitBuilder {
            parent: self,
            settings: RateLimitSettings::default(),
            _marker: PhantomData,
        }
    }

    fn with_retry(self) -> RetryBuilder<Self, T, E> {
        RetryBuilder { parent: self, settings: RetrySettings::default(), _marker: PhantomData }
    }

    fn with_timeout(self) -> TimeoutBuilder<Self, T, E> {
        TimeoutBuilder { parent: self, settings: TimeoutSettings::default(), _marker: PhantomData }
    }

    fn with_fallback(self) -> FallbackBuilder<Self, T, E> {
        FallbackBuilder { parent: self, settings: FallbackSettings::default(), _marker: PhantomData }
    }

    fn with_metrics_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.core_mut().sink = Arc::new(sink);
        self
    }

    fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.core_mut().clock = Arc::new(clock);
        self
    }

    /// Use a registry other than the process-wide one (mostly for tests).
    fn with_maintenance(mut self, maintenance: &CircuitBreakerMaintenance) -> Self {
        self.core_mut().maintenance = maintenance.clone();
        self
    }

    /// Override the process-wide configuration (mostly for tests).
    fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.core_mut().runtime_config = Some(config);
        self
    }
}

/// Builder for [`SyncPipeline`].
pub struct SyncPipelineBuilder<T, E> {
    core: CoreSettings<T, E>,
}

impl<T, E> PipelineBuilder<T, E> for SyncPipelineBuilder<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn core_mut(&mut self) -> &mut CoreSettings<T, E> {
        &mut self.core
    }
}

impl<T, E> SyncPipelineBuilder<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn build(self) -> Result<SyncPipeline<T, E>, DefinitionError> {
        let (strategies, registration) = build_strategies(self.core)?;
        Ok(SyncPipeline::new(strategies, registration))
    }
}

/// Builder for [`Pipeline`].
pub struct AsyncPipelineBuilder<T, E> {
    core: CoreSettings<T, E>,
}

impl<T, E> PipelineBuilder<T, E> for AsyncPipelineBuilder<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn core_mut(&mut self) -> &mut CoreSettings<T, E> {
        &mut self.core
    }
}

impl<T, E> AsyncPipelineBuilder<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Schedule every invocation through the executor instead of the caller
    /// task.
    pub fn with_thread_offload(mut self, enabled: bool) -> Self {
        self.core.offload = enabled;
        self
    }

    pub fn with_executor(mut self, executor: impl AsyncExecutor + 'static) -> Self {
        self.core.executor = Arc::new(executor);
        self
    }

    pub fn build(self) -> Result<Pipeline<T, E>, DefinitionError> {
        let (strategies, registration) = build_strategies(self.core)?;
        Ok(Pipeline::new(strategies, registration))
    }
}

fn build_strategies<T, E>(
    core: CoreSettings<T, E>,
) -> Result<(Strategies<T, E>, Option<RegistrationGuard>), DefinitionError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let CoreSettings {
        bulkhead,
        circuit_breaker,
        rate_limit,
        retry,
        timeout,
        fallback,
        offload,
        executor,
        sink,
        clock,
        maintenance,
        runtime_config,
    } = core;

    let runtime = runtime_config.unwrap_or_else(RuntimeConfig::global);
    let guards_enabled = runtime.non_fallback_enabled;

    let fallback = match fallback {
        Some(settings) => {
            let mode = if settings.deep_causes { CauseChainMode::Deep } else { CauseChainMode::Strict };
            let apply_on = if settings.apply_on.is_empty() {
                vec![ErrorMatcher::any()]
            } else {
                settings.apply_on
            };
            let classifier = ErrorClassifier::new(apply_on, settings.skip_on, mode);
            Fallback::new(
                settings.typed,
                settings.catch_all,
                classifier,
                mode,
                sink.clone(),
                settings.on_applied,
            )?
        }
        None => Fallback::disabled(),
    };

    let retry = match retry.filter(|_| guards_enabled) {
        Some(settings) => {
            let retry_on = if settings.retry_on.is_empty() {
                vec![ErrorMatcher::any()]
            } else {
                settings.retry_on
            };
            let classifier =
                ErrorClassifier::new(retry_on, settings.abort_on, CauseChainMode::Strict);
            Retry::new(
                settings.max_retries,
                settings.max_duration,
                settings.backoff,
                settings.jitter,
                classifier,
                settings.sleeper,
                settings.blocking_sleeper,
                sink.clone(),
                settings.on_retry,
                settings.on_exhausted,
            )
        }
        None => Retry::disabled(),
    };

    let mut registration = None;
    let circuit_breaker = match circuit_breaker.filter(|_| guards_enabled) {
        Some(settings) => {
            if settings.request_volume_threshold == 0 {
                return Err(DefinitionError::ZeroRequestVolume);
            }
            if !(0.0..=1.0).contains(&settings.failure_ratio) {
                return Err(DefinitionError::InvalidFailureRatio(settings.failure_ratio));
            }
            if settings.success_threshold == 0 {
                return Err(DefinitionError::ZeroSuccessThreshold);
            }
            let breaker_core = Arc::new(BreakerCore::new(settings.request_volume_threshold));
            for callback in settings.on_state_change {
                breaker_core.subscribe(callback);
            }
            if let Some(name) = &settings.name {
                maintenance.register(name, breaker_core.clone())?;
                registration = Some(RegistrationGuard::new(name.clone(), maintenance.clone()));
            }
            let fail_on = if settings.fail_on.is_empty() {
                vec![ErrorMatcher::any()]
            } else {
                settings.fail_on
            };
            let classifier =
                ErrorClassifier::new(fail_on, settings.skip_on, CauseChainMode::Strict);
            CircuitBreaker::new(
                breaker_core,
                CircuitBreakerConfig {
                    request_volume_threshold: settings.request_volume_threshold,
                    failure_ratio: settings.failure_ratio,
                    delay: settings.delay,
                    success_threshold: settings.success_threshold,
                },
                classifier,
                clock.clone(),
                sink.clone(),
                settings.on_success,
                settings.on_failure,
                settings.on_prevented,
                settings.name,
            )
        }
        None => CircuitBreaker::disabled(),
    };

    let rate_limit = match rate_limit.filter(|_| guards_enabled) {
        Some(settings) => {
            if settings.limit == 0 || settings.window.is_zero() {
                return Err(DefinitionError::InvalidRateLimit);
            }
            RateLimit::new(
                settings.window_type,
                settings.limit,
                settings.window,
                settings.min_spacing,
                clock.clone(),
                sink.clone(),
                settings.on_permitted,
                settings.on_rejected,
            )
        }
        None => RateLimit::disabled(),
    };

    let timeout = match timeout.filter(|_| guards_enabled) {
        Some(settings) => {
            if settings.duration.is_zero() {
                return Err(DefinitionError::ZeroTimeout);
            }
            Timeout::new(settings.duration, sink.clone(), settings.on_timeout, settings.on_finished)
        }
        None => Timeout::disabled(),
    };

    let bulkhead = match bulkhead.filter(|_| guards_enabled) {
        Some(settings) => {
            if settings.capacity == 0 {
                return Err(DefinitionError::ZeroBulkheadCapacity);
            }
            Bulkhead::new(
                settings.capacity,
                settings.queue_size,
                sink.clone(),
                settings.on_accepted,
                settings.on_rejected,
                settings.on_queue_left,
            )
        }
        None => Bulkhead::disabled(),
    };

    let offload = if offload { Offload::new(executor) } else { Offload::disabled() };

    Ok((
        Strategies { fallback, retry, circuit_breaker, rate_limit, timeout, bulkhead, offload },
        registration,
    ))
}

/// Configures the bulkhead strategy; close with `done()`.
pub struct BulkheadBuilder<B, T, E> {
    parent: B,
    settings: BulkheadSettings,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<B, T, E> BulkheadBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Maximum concurrent invocations.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.settings.capacity = capacity;
        self
    }

    /// Waiting-queue size for async invocations; sync invocations never queue.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.settings.queue_size = queue_size;
        self
    }

    pub fn on_accepted<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_accepted.push(Arc::new(callback));
        self
    }

    pub fn on_rejected<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_rejected.push(Arc::new(callback));
        self
    }

    pub fn on_queue_left<F: Fn(Duration) + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_queue_left.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().bulkhead = Some(self.settings);
        self.parent
    }
}

/// Configures the circuit-breaker strategy; close with `done()`.
pub struct CircuitBreakerBuilder<B, T, E> {
    parent: B,
    settings: CircuitBreakerSettings<E>,
    _marker: PhantomData<fn() -> T>,
}

impl<B, T, E> CircuitBreakerBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Size of the rolling outcome window.
    pub fn request_volume_threshold(mut self, threshold: usize) -> Self {
        self.settings.request_volume_threshold = threshold;
        self
    }

    /// Failure ratio which, once strictly exceeded over a full window, opens
    /// the breaker.
    pub fn failure_ratio(mut self, ratio: f64) -> Self {
        self.settings.failure_ratio = ratio;
        self
    }

    /// How long the breaker stays open before admitting a trial.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.settings.delay = delay;
        self
    }

    /// Consecutive trial successes required to close again.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.settings.success_threshold = threshold;
        self
    }

    /// Register this breaker process-wide under a unique name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = Some(name.into());
        self
    }

    /// Count only matching failures against the window.
    pub fn fail_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.fail_on.push(matcher);
        self
    }

    /// Treat matching failures as successes.
    pub fn skip_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.skip_on.push(matcher);
        self
    }

    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.settings.on_state_change.push(Arc::new(callback));
        self
    }

    pub fn on_success<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_success.push(Arc::new(callback));
        self
    }

    pub fn on_failure<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_failure.push(Arc::new(callback));
        self
    }

    pub fn on_prevented<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_prevented.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().circuit_breaker = Some(self.settings);
        self.parent
    }
}

/// Configures the rate-limit strategy; close with `done()`.
pub struct RateLimitBuilder<B, T, E> {
    parent: B,
    settings: RateLimitSettings,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<B, T, E> RateLimitBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Maximum invocations per window.
    pub fn limit(mut self, limit: u64) -> Self {
        self.settings.limit = limit;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.settings.window = window;
        self
    }

    /// Minimum spacing between consecutive invocations.
    pub fn min_spacing(mut self, min_spacing: Duration) -> Self {
        self.settings.min_spacing = min_spacing;
        self
    }

    pub fn window_type(mut self, window_type: RateLimitType) -> Self {
        self.settings.window_type = window_type;
        self
    }

    pub fn on_permitted<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_permitted.push(Arc::new(callback));
        self
    }

    pub fn on_rejected<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_rejected.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().rate_limit = Some(self.settings);
        self.parent
    }
}

/// Configures the retry strategy; close with `done()`.
pub struct RetryBuilder<B, T, E> {
    parent: B,
    settings: RetrySettings<E>,
    _marker: PhantomData<fn() -> T>,
}

impl<B, T, E> RetryBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Extra attempts after the first failure.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.settings.max_retries = max_retries;
        self
    }

    /// Total budget for all attempts and delays; zero means no cap.
    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.settings.max_duration = max_duration;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.settings.backoff = backoff;
        self
    }

    /// Uniform ± jitter applied to each delay.
    pub fn jitter(mut self, amplitude: Duration) -> Self {
        self.settings.jitter = if amplitude.is_zero() {
            Jitter::None
        } else {
            Jitter::uniform(amplitude)
        };
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.settings.jitter = jitter;
        self
    }

    /// Retry only on matching failures (default: all failures).
    pub fn retry_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.retry_on.push(matcher);
        self
    }

    /// Never retry matching failures, even when `retry_on` matches.
    pub fn abort_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.abort_on.push(matcher);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.settings.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_blocking_sleeper(mut self, sleeper: impl BlockingSleeper + 'static) -> Self {
        self.settings.blocking_sleeper = Arc::new(sleeper);
        self
    }

    pub fn on_retry<F: Fn(u32) + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_retry.push(Arc::new(callback));
        self
    }

    pub fn on_exhausted<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_exhausted.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().retry = Some(self.settings);
        self.parent
    }
}

/// Configures the timeout strategy; close with `done()`.
pub struct TimeoutBuilder<B, T, E> {
    parent: B,
    settings: TimeoutSettings,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<B, T, E> TimeoutBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn duration(mut self, duration: Duration) -> Self {
        self.settings.duration = duration;
        self
    }

    pub fn on_timeout<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_timeout.push(Arc::new(callback));
        self
    }

    pub fn on_finished<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_finished.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().timeout = Some(self.settings);
        self.parent
    }
}

/// Configures the fallback strategy; close with `done()`.
pub struct FallbackBuilder<B, T, E> {
    parent: B,
    settings: FallbackSettings<T, E>,
    _marker: PhantomData<fn() -> T>,
}

impl<B, T, E> FallbackBuilder<B, T, E>
where
    B: PipelineBuilder<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Catch-all handler, used when no typed handler matches.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&FaultToleranceError<E>) -> Result<T, E> + Send + Sync + 'static,
    {
        self.settings.catch_all =
            Some(Arc::new(move |err| handler(err).map_err(FaultToleranceError::Inner)));
        self
    }

    /// Handler for failures whose error downcasts to `C`. At most one handler
    /// per concrete type.
    pub fn handle<C, F>(mut self, handler: F) -> Self
    where
        C: std::error::Error + 'static,
        F: Fn(&C) -> Result<T, E> + Send + Sync + 'static,
    {
        self.settings.typed.push(TypedHandler::new(handler));
        self
    }

    /// Apply the fallback only to matching failures (default: all failures).
    pub fn apply_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.apply_on.push(matcher);
        self
    }

    /// Rethrow matching failures untouched.
    pub fn skip_on(mut self, matcher: ErrorMatcher<E>) -> Self {
        self.settings.skip_on.push(matcher);
        self
    }

    /// Also scan the failure's cause chain during activation and handler
    /// resolution.
    pub fn deep_causes(mut self) -> Self {
        self.settings.deep_causes = true;
        self
    }

    pub fn on_applied<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.settings.on_applied.push(Arc::new(callback));
        self
    }

    pub fn done(mut self) -> B {
        self.parent.core_mut().fallback = Some(self.settings);
        self.parent
    }
}
