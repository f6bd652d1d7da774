//! Convenient re-exports for common Guardrail types.
pub use crate::{
    backoff::{Backoff, DEFAULT_MAX_DELAY},
    builder::{AsyncPipelineBuilder, FaultTolerance, PipelineBuilder, SyncPipelineBuilder},
    cache::{InterceptionPoint, StrategyCache},
    circuit_breaker::CircuitState,
    classifier::{CauseChainMode, ErrorClassifier, ErrorMatcher},
    clock::{Clock, ManualClock, MonotonicClock},
    config::{ConfigSource, EnvConfigSource, RuntimeConfig},
    jitter::Jitter,
    maintenance::CircuitBreakerMaintenance,
    metrics::{LogSink, MemorySink, MetricsEvent, MetricsSink, NullSink},
    offload::{AsyncExecutor, TokioExecutor},
    pipeline::{GuardedAsyncCall, GuardedCall, Pipeline, SyncPipeline},
    rate_limit::RateLimitType,
    sleeper::{BlockingSleeper, InstantSleeper, Sleeper, ThreadSleeper, TokioSleeper},
    DefinitionError, FaultToleranceError,
};
