//! Error classification shared by retry, circuit breaker, and fallback.
//!
//! A classifier holds two matcher sets: one that makes a strategy act on an
//! error ("apply") and one that makes it leave the error alone ("skip").
//! Skip always beats apply. In [`CauseChainMode::Deep`] a second pass walks
//! the error's `source()` chain depth-first, stopping at the first node either
//! set matches.

use crate::FaultToleranceError;
use std::error::Error;
use std::sync::Arc;

type TopMatch<E> = Arc<dyn Fn(&FaultToleranceError<E>) -> bool + Send + Sync>;
type CauseMatch = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Matches a guarded invocation's failure, either directly or inside a cause chain.
pub struct ErrorMatcher<E> {
    label: &'static str,
    top: TopMatch<E>,
    cause: CauseMatch,
}

impl<E> Clone for ErrorMatcher<E> {
    fn clone(&self) -> Self {
        Self { label: self.label, top: self.top.clone(), cause: self.cause.clone() }
    }
}

impl<E> std::fmt::Debug for ErrorMatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErrorMatcher({})", self.label)
    }
}

impl<E> ErrorMatcher<E>
where
    E: Error + Send + Sync + 'static,
{
    /// Matches every failure.
    pub fn any() -> Self {
        Self { label: "any", top: Arc::new(|_| true), cause: Arc::new(|_| true) }
    }

    /// Matches timeouts raised by the timeout strategy.
    pub fn timeout() -> Self {
        Self {
            label: "timeout",
            top: Arc::new(|e| e.is_timeout()),
            cause: Arc::new(|c| {
                c.downcast_ref::<FaultToleranceError<E>>().is_some_and(|e| e.is_timeout())
            }),
        }
    }

    /// Matches open-circuit rejections.
    pub fn circuit_breaker_open() -> Self {
        Self {
            label: "circuit_breaker_open",
            top: Arc::new(|e| e.is_circuit_breaker_open()),
            cause: Arc::new(|c| {
                c.downcast_ref::<FaultToleranceError<E>>()
                    .is_some_and(|e| e.is_circuit_breaker_open())
            }),
        }
    }

    /// Matches bulkhead rejections.
    pub fn bulkhead_rejected() -> Self {
        Self {
            label: "bulkhead_rejected",
            top: Arc::new(|e| e.is_bulkhead_rejected()),
            cause: Arc::new(|c| {
                c.downcast_ref::<FaultToleranceError<E>>().is_some_and(|e| e.is_bulkhead_rejected())
            }),
        }
    }

    /// Matches rate-limit rejections.
    pub fn rate_limited() -> Self {
        Self {
            label: "rate_limited",
            top: Arc::new(|e| e.is_rate_limited()),
            cause: Arc::new(|c| {
                c.downcast_ref::<FaultToleranceError<E>>().is_some_and(|e| e.is_rate_limited())
            }),
        }
    }

    /// Matches when the action's error (or a cause-chain node) downcasts to `C`.
    pub fn of<C: Error + 'static>() -> Self {
        Self {
            label: std::any::type_name::<C>(),
            top: Arc::new(|e| match e {
                FaultToleranceError::Inner(inner) => {
                    let dyn_err: &(dyn Error + 'static) = inner;
                    dyn_err.is::<C>()
                }
                _ => false,
            }),
            cause: Arc::new(|c| c.is::<C>()),
        }
    }

    /// Matches action errors satisfying a predicate. Cause-chain nodes are
    /// tested when they downcast back to `E`.
    pub fn inner<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + Clone + 'static,
    {
        let cause_predicate = predicate.clone();
        Self {
            label: "inner-predicate",
            top: Arc::new(move |e| match e {
                FaultToleranceError::Inner(inner) => predicate(inner),
                _ => false,
            }),
            cause: Arc::new(move |c| c.downcast_ref::<E>().is_some_and(&cause_predicate)),
        }
    }

    fn matches(&self, err: &FaultToleranceError<E>) -> bool {
        (self.top)(err)
    }

    fn matches_cause(&self, cause: &(dyn Error + 'static)) -> bool {
        (self.cause)(cause)
    }
}

/// Whether classification walks the cause chain after the direct pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CauseChainMode {
    /// Only the thrown error itself is classified.
    #[default]
    Strict,
    /// The cause chain is walked depth-first after the direct pass.
    Deep,
}

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The strategy acts on this error.
    Apply,
    /// The strategy leaves this error alone.
    Skip,
    /// Neither set matched.
    Unmatched,
}

/// Two matcher sets with skip-beats-apply priority.
pub struct ErrorClassifier<E> {
    apply_on: Vec<ErrorMatcher<E>>,
    skip_on: Vec<ErrorMatcher<E>>,
    mode: CauseChainMode,
}

impl<E> Clone for ErrorClassifier<E> {
    fn clone(&self) -> Self {
        Self { apply_on: self.apply_on.clone(), skip_on: self.skip_on.clone(), mode: self.mode }
    }
}

impl<E> std::fmt::Debug for ErrorClassifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("apply_on", &self.apply_on)
            .field("skip_on", &self.skip_on)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<E> ErrorClassifier<E>
where
    E: Error + Send + Sync + 'static,
{
    pub fn new(
        apply_on: Vec<ErrorMatcher<E>>,
        skip_on: Vec<ErrorMatcher<E>>,
        mode: CauseChainMode,
    ) -> Self {
        Self { apply_on, skip_on, mode }
    }

    /// Classifier that applies to every failure.
    pub fn apply_to_all() -> Self {
        Self::new(vec![ErrorMatcher::any()], Vec::new(), CauseChainMode::Strict)
    }

    pub fn classify(&self, err: &FaultToleranceError<E>) -> Classification {
        if self.skip_on.iter().any(|m| m.matches(err)) {
            return Classification::Skip;
        }
        if self.apply_on.iter().any(|m| m.matches(err)) {
            return Classification::Apply;
        }
        if self.mode == CauseChainMode::Deep {
            let mut cursor = (err as &dyn Error).source();
            while let Some(cause) = cursor {
                if self.skip_on.iter().any(|m| m.matches_cause(cause)) {
                    return Classification::Skip;
                }
                if self.apply_on.iter().any(|m| m.matches_cause(cause)) {
                    return Classification::Apply;
                }
                cursor = cause.source();
            }
        }
        Classification::Unmatched
    }
}
