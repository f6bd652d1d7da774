//! Error types surfaced by guarded pipelines.

use std::fmt;
use std::time::Duration;

/// Unified error type for guarded invocations.
///
/// Every strategy in a pipeline either passes the inner outcome through or
/// short-circuits with one of the strategy variants below. The guarded
/// action's own failures travel as [`FaultToleranceError::Inner`].
#[derive(Debug)]
pub enum FaultToleranceError<E> {
    /// The invocation exceeded the configured timeout.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The circuit breaker is open; `remaining` is the time left on its delay timer.
    CircuitBreakerOpen { remaining: Duration },
    /// The bulkhead had no permit and no queue capacity left.
    BulkheadRejected { in_flight: usize, max: usize },
    /// The rate limiter rejected the attempt; `retry_after` is the window's hint.
    RateLimited { retry_after: Duration },
    /// The async executor refused to accept the offloaded task.
    ExecutionRejected,
    /// The guarded action failed.
    Inner(E),
}

impl<E: Clone> Clone for FaultToleranceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::CircuitBreakerOpen { remaining } => {
                Self::CircuitBreakerOpen { remaining: *remaining }
            }
            Self::BulkheadRejected { in_flight, max } => {
                Self::BulkheadRejected { in_flight: *in_flight, max: *max }
            }
            Self::RateLimited { retry_after } => Self::RateLimited { retry_after: *retry_after },
            Self::ExecutionRejected => Self::ExecutionRejected,
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for FaultToleranceError<E> {
    fn eq(&self, other: &Self) -> bool {
        use FaultToleranceError::*;
        match (self, other) {
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (CircuitBreakerOpen { remaining: r1 }, CircuitBreakerOpen { remaining: r2 }) => {
                r1 == r2
            }
            (
                BulkheadRejected { in_flight: a1, max: b1 },
                BulkheadRejected { in_flight: a2, max: b2 },
            ) => a1 == a2 && b1 == b2,
            (RateLimited { retry_after: r1 }, RateLimited { retry_after: r2 }) => r1 == r2,
            (ExecutionRejected, ExecutionRejected) => true,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for FaultToleranceError<E> {}

impl<E: fmt::Display> fmt::Display for FaultToleranceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "invocation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitBreakerOpen { remaining } => {
                write!(f, "circuit breaker open ({:?} until half-open)", remaining)
            }
            Self::BulkheadRejected { in_flight, max } => {
                write!(f, "bulkhead rejected invocation ({} in-flight, max {})", in_flight, max)
            }
            Self::RateLimited { retry_after } => {
                write!(f, "rate limit exceeded (retry after {:?})", retry_after)
            }
            Self::ExecutionRejected => write!(f, "executor rejected the offloaded invocation"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FaultToleranceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> FaultToleranceError<E> {
    /// Check if this error was raised by the timeout strategy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error was raised by an open circuit breaker.
    pub fn is_circuit_breaker_open(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }

    /// Check if this error was raised by the bulkhead.
    pub fn is_bulkhead_rejected(&self) -> bool {
        matches!(self, Self::BulkheadRejected { .. })
    }

    /// Check if this error was raised by the rate limiter.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error wraps a failure of the guarded action itself.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the guarded action's error if this is an `Inner` variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the guarded action's error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Build-time validation failure raised by the pipeline builders.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("circuit breaker name {0:?} is already registered")]
    DuplicateCircuitBreakerName(String),
    #[error("a fallback handler for error type {0} is already registered")]
    DuplicateFallbackHandler(&'static str),
    #[error("timeout duration must be > 0")]
    ZeroTimeout,
    #[error("bulkhead capacity must be > 0")]
    ZeroBulkheadCapacity,
    #[error("rate limit window must be > 0 and allow at least one invocation")]
    InvalidRateLimit,
    #[error("circuit breaker failure ratio must be within 0.0..=1.0 (got {0})")]
    InvalidFailureRatio(f64),
    #[error("circuit breaker request volume threshold must be > 0")]
    ZeroRequestVolume,
    #[error("circuit breaker success threshold must be > 0")]
    ZeroSuccessThreshold,
}
