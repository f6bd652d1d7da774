#![forbid(unsafe_code)]

//! # Guardrail
//!
//! Composable fault tolerance for callable actions: fallback, retry, circuit
//! breaker, rate limit, timeout, bulkhead, and thread offload, assembled into
//! a single guarded pipeline.
//!
//! ## Features
//!
//! - **Uniform pipelines** for synchronous and asynchronous actions, composed
//!   in a fixed canonical order
//! - **Retry** with constant/exponential/Fibonacci/custom backoff and jitter
//! - **Circuit breakers** with a rolling outcome window, trial recovery, and a
//!   process-wide maintenance registry for named breakers
//! - **Rate limiting** with fixed, rolling, and smooth windows
//! - **Bulkheads** with FIFO queueing for async callers
//! - **Error classification** (`retry_on`/`abort_on`, `fail_on`/`skip_on`,
//!   `apply_on`) with optional cause-chain scanning
//! - **Pluggable collaborators**: metrics sinks, clocks, sleepers, executors,
//!   and configuration sources
//!
//! ## Quick start
//!
//! ```rust
//! use std::fmt;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use guardrail::{Backoff, FaultTolerance, PipelineBuilder};
//!
//! #[derive(Debug)]
//! struct ServiceError(&'static str);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "service error: {}", self.0)
//!     }
//! }
//!
//! impl std::error::Error for ServiceError {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = FaultTolerance::create_async::<String, ServiceError>()
//!         .with_retry()
//!         .max_retries(3)
//!         .backoff(Backoff::constant(Duration::from_millis(10)))
//!         .jitter(Duration::ZERO)
//!         .done()
//!         .with_timeout()
//!         .duration(Duration::from_secs(1))
//!         .done()
//!         .with_fallback()
//!         .handler(|_| Ok("fallback".to_string()))
//!         .done()
//!         .build()?;
//!
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!     let attempts_op = attempts.clone();
//!     let value = pipeline
//!         .call(move || {
//!             let attempts = attempts_op.clone();
//!             async move {
//!                 if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
//!                     Err(ServiceError("transient failure"))
//!                 } else {
//!                     Ok("value".to_string())
//!                 }
//!             }
//!         })
//!         .await?;
//!
//!     assert_eq!(value, "value");
//!     Ok(())
//! }
//! ```

mod backoff;
mod builder;
mod bulkhead;
mod cache;
mod circuit_breaker;
mod classifier;
mod clock;
mod config;
mod error;
mod fallback;
mod jitter;
mod maintenance;
mod metrics;
mod offload;
mod pipeline;
mod rate_limit;
mod retry;
mod sleeper;
mod timeout;

// Re-exports
pub use backoff::{Backoff, CustomDelayFn, DEFAULT_MAX_DELAY};
pub use builder::{
    AsyncPipelineBuilder, BulkheadBuilder, CircuitBreakerBuilder, FallbackBuilder, FaultTolerance,
    PipelineBuilder, RateLimitBuilder, RetryBuilder, SyncPipelineBuilder, TimeoutBuilder,
};
pub use cache::{InterceptionPoint, StrategyCache};
pub use circuit_breaker::CircuitState;
pub use classifier::{CauseChainMode, Classification, ErrorClassifier, ErrorMatcher};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigSource, EnvConfigSource, RuntimeConfig, NON_FALLBACK_ENABLED_PROPERTY};
pub use error::{DefinitionError, FaultToleranceError};
pub use jitter::Jitter;
pub use maintenance::CircuitBreakerMaintenance;
pub use metrics::{LogSink, MemorySink, MetricsEvent, MetricsSink, NullSink};
pub use offload::{AsyncExecutor, RejectedExecution, TokioExecutor};
pub use pipeline::{GuardedAsyncCall, GuardedCall, Pipeline, SyncPipeline};
pub use rate_limit::RateLimitType;
pub use sleeper::{
    BlockingSleeper, InstantSleeper, Sleeper, ThreadSleeper, TokioSleeper, TrackingSleeper,
};

pub mod prelude;
