//! Fallback strategy.
//!
//! When the inner invocation fails and the activation classifier applies,
//! a substitute outcome is produced. Handlers registered for a concrete error
//! type are resolved by downcast: the thrown error itself first, then (in
//! deep mode) its cause chain nearest-first. The catch-all handler runs only
//! when no typed handler matched. With nothing applicable the original error
//! is rethrown as if no fallback were declared.

use crate::classifier::{CauseChainMode, Classification, ErrorClassifier};
use crate::metrics::{run_callbacks, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::{DefinitionError, FaultToleranceError};
use std::any::TypeId;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;

pub(crate) type HandlerFn<T, E> =
    Arc<dyn Fn(&FaultToleranceError<E>) -> Result<T, FaultToleranceError<E>> + Send + Sync>;
type TypedInvoke<T, E> =
    Arc<dyn Fn(&(dyn Error + 'static)) -> Option<Result<T, FaultToleranceError<E>>> + Send + Sync>;

/// Handler bound to one concrete error type.
pub(crate) struct TypedHandler<T, E> {
    type_id: TypeId,
    type_name: &'static str,
    invoke: TypedInvoke<T, E>,
}

impl<T, E> Clone for TypedHandler<T, E> {
    fn clone(&self) -> Self {
        Self { type_id: self.type_id, type_name: self.type_name, invoke: self.invoke.clone() }
    }
}

impl<T, E> TypedHandler<T, E>
where
    E: Error + Send + Sync + 'static,
{
    pub(crate) fn new<C, F>(handler: F) -> Self
    where
        C: Error + 'static,
        F: Fn(&C) -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            invoke: Arc::new(move |node| {
                node.downcast_ref::<C>()
                    .map(|c| handler(c).map_err(FaultToleranceError::Inner))
            }),
        }
    }
}

pub(crate) struct Fallback<T, E> {
    enabled: bool,
    typed: Vec<TypedHandler<T, E>>,
    catch_all: Option<HandlerFn<T, E>>,
    classifier: ErrorClassifier<E>,
    mode: CauseChainMode,
    sink: Arc<dyn MetricsSink>,
    on_applied: Vec<Callback>,
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            typed: self.typed.clone(),
            catch_all: self.catch_all.clone(),
            classifier: self.classifier.clone(),
            mode: self.mode,
            sink: self.sink.clone(),
            on_applied: self.on_applied.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback")
            .field("enabled", &self.enabled)
            .field("typed_handlers", &self.typed.len())
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}

impl<T, E> Fallback<T, E>
where
    E: Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        typed: Vec<TypedHandler<T, E>>,
        catch_all: Option<HandlerFn<T, E>>,
        classifier: ErrorClassifier<E>,
        mode: CauseChainMode,
        sink: Arc<dyn MetricsSink>,
        on_applied: Vec<Callback>,
    ) -> Result<Self, DefinitionError> {
        for (i, handler) in typed.iter().enumerate() {
            if typed[..i].iter().any(|other| other.type_id == handler.type_id) {
                return Err(DefinitionError::DuplicateFallbackHandler(handler.type_name));
            }
        }
        Ok(Self { enabled: true, typed, catch_all, classifier, mode, sink, on_applied })
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            typed: Vec::new(),
            catch_all: None,
            classifier: ErrorClassifier::apply_to_all(),
            mode: CauseChainMode::Strict,
            sink: Arc::new(NullSink),
            on_applied: Vec::new(),
        }
    }

    fn applied(&self) {
        tracing::debug!("fallback applied");
        self.sink.record(MetricsEvent::FallbackApplied);
        run_callbacks("fallback.applied", &self.on_applied);
    }

    fn handle(&self, err: FaultToleranceError<E>) -> Result<T, FaultToleranceError<E>> {
        if !self.enabled {
            return Err(err);
        }
        if self.classifier.classify(&err) != Classification::Apply {
            return Err(err);
        }

        if let FaultToleranceError::Inner(inner) = &err {
            let direct: &(dyn Error + 'static) = inner;
            for handler in &self.typed {
                if let Some(outcome) = (handler.invoke)(direct) {
                    self.applied();
                    return outcome;
                }
            }
            if self.mode == CauseChainMode::Deep {
                let mut cursor = direct.source();
                while let Some(node) = cursor {
                    for handler in &self.typed {
                        if let Some(outcome) = (handler.invoke)(node) {
                            self.applied();
                            return outcome;
                        }
                    }
                    cursor = node.source();
                }
            }
        }

        if let Some(catch_all) = &self.catch_all {
            let outcome = catch_all(&err);
            self.applied();
            return outcome;
        }

        Err(err)
    }

    pub(crate) async fn execute<Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(err) => self.handle(err),
        }
    }

    pub(crate) fn execute_blocking<Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnOnce() -> Result<T, FaultToleranceError<E>>,
    {
        match op() {
            Ok(value) => Ok(value),
            Err(err) => self.handle(err),
        }
    }
}
