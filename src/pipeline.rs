//! Guarded pipelines: the canonical-order composition of strategies around a
//! callable action.
//!
//! Strategy order is fixed regardless of builder call order:
//!
//! Fallback → Retry → CircuitBreaker → RateLimit → Timeout → Bulkhead →
//! ThreadOffload → target
//!
//! Unconfigured strategies participate as pass-throughs, so every invocation
//! flows through the same shape in both modes.

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::fallback::Fallback;
use crate::maintenance::RegistrationGuard;
use crate::offload::Offload;
use crate::rate_limit::RateLimit;
use crate::retry::Retry;
use crate::timeout::Timeout;
use crate::FaultToleranceError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub(crate) struct Strategies<T, E> {
    pub(crate) fallback: Fallback<T, E>,
    pub(crate) retry: Retry<E>,
    pub(crate) circuit_breaker: CircuitBreaker<E>,
    pub(crate) rate_limit: RateLimit,
    pub(crate) timeout: Timeout,
    pub(crate) bulkhead: Bulkhead,
    pub(crate) offload: Offload,
}

#[cfg(test)]
impl<T, E> Strategies<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn pass_through() -> Self {
        Self {
            fallback: Fallback::disabled(),
            retry: Retry::disabled(),
            circuit_breaker: CircuitBreaker::disabled(),
            rate_limit: RateLimit::disabled(),
            timeout: Timeout::disabled(),
            bulkhead: Bulkhead::disabled(),
            offload: Offload::disabled(),
        }
    }
}

/// Asynchronous guarded pipeline produced by
/// [`FaultTolerance::create_async`](crate::FaultTolerance::create_async).
pub struct Pipeline<T, E> {
    strategies: Strategies<T, E>,
    _registration: Option<RegistrationGuard>,
}

impl<T, E> Pipeline<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        strategies: Strategies<T, E>,
        registration: Option<RegistrationGuard>,
    ) -> Self {
        Self { strategies, _registration: registration }
    }

    /// Run one guarded invocation of `op`.
    ///
    /// Retry may invoke `op` several times. Dropping the returned future
    /// cancels the in-flight invocation.
    pub async fn call<Op, Fut>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let s = &self.strategies;
        let op = Arc::new(Mutex::new(op));
        s.fallback
            .execute(|| {
                let op = op.clone();
                let retry = s.retry.clone();
                let circuit_breaker = s.circuit_breaker.clone();
                let rate_limit = s.rate_limit.clone();
                let timeout = s.timeout.clone();
                let bulkhead = s.bulkhead.clone();
                let offload = s.offload.clone();
                async move {
                    retry
                        .execute(|| {
                            let op = op.clone();
                            let circuit_breaker = circuit_breaker.clone();
                            let rate_limit = rate_limit.clone();
                            let timeout = timeout.clone();
                            let bulkhead = bulkhead.clone();
                            let offload = offload.clone();
                            async move {
                                circuit_breaker
                                    .execute(|| {
                                        let op = op.clone();
                                        let rate_limit = rate_limit.clone();
                                        let timeout = timeout.clone();
                                        let bulkhead = bulkhead.clone();
                                        let offload = offload.clone();
                                        async move {
                                            rate_limit
                                                .execute(|| {
                                                    let op = op.clone();
                                                    let timeout = timeout.clone();
                                                    let bulkhead = bulkhead.clone();
                                                    let offload = offload.clone();
                                                    async move {
                                                        timeout
                                                            .execute(|| {
                                                                let op = op.clone();
                                                                let bulkhead = bulkhead.clone();
                                                                let offload = offload.clone();
                                                                async move {
                                                                    bulkhead
                                                                        .execute(|| {
                                                                            let op = op.clone();
                                                                            let offload =
                                                                                offload.clone();
                                                                            async move {
                                                                                offload
                                                                                    .execute(|| {
                                                                                        let fut = {
                                                                                            let mut guard = op
                                                                                                .lock()
                                                                                                .unwrap_or_else(|p| p.into_inner());
                                                                                            (*guard)()
                                                                                        };
                                                                                        async move {
                                                                                            fut.await.map_err(
                                                                                                FaultToleranceError::Inner,
                                                                                            )
                                                                                        }
                                                                                    })
                                                                                    .await
                                                                            }
                                                                        })
                                                                        .await
                                                                }
                                                            })
                                                            .await
                                                    }
                                                })
                                                .await
                                        }
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }

    /// Bind `op` to this pipeline as a directly invocable action sharing the
    /// pipeline's strategy state.
    pub fn adapt<Op, Fut>(self: &Arc<Self>, mut op: Op) -> GuardedAsyncCall<T, E>
    where
        Op: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        GuardedAsyncCall {
            pipeline: self.clone(),
            op: Arc::new(Mutex::new(Box::new(move || op().boxed()))),
        }
    }
}

type BoundAsyncOp<T, E> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, E>> + Send>;

/// Asynchronous action bound to a pipeline.
pub struct GuardedAsyncCall<T, E> {
    pipeline: Arc<Pipeline<T, E>>,
    op: Arc<Mutex<BoundAsyncOp<T, E>>>,
}

impl<T, E> Clone for GuardedAsyncCall<T, E> {
    fn clone(&self) -> Self {
        Self { pipeline: self.pipeline.clone(), op: self.op.clone() }
    }
}

impl<T, E> GuardedAsyncCall<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub async fn invoke(&self) -> Result<T, FaultToleranceError<E>> {
        let op = self.op.clone();
        self.pipeline
            .call(move || {
                let mut guard = op.lock().unwrap_or_else(|p| p.into_inner());
                (*guard)()
            })
            .await
    }
}

/// Synchronous guarded pipeline produced by
/// [`FaultTolerance::create`](crate::FaultTolerance::create).
pub struct SyncPipeline<T, E> {
    strategies: Strategies<T, E>,
    _registration: Option<RegistrationGuard>,
}

impl<T, E> std::fmt::Debug for SyncPipeline<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline").finish_non_exhaustive()
    }
}

impl<T, E> SyncPipeline<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        strategies: Strategies<T, E>,
        registration: Option<RegistrationGuard>,
    ) -> Self {
        Self { strategies, _registration: registration }
    }

    /// Run one guarded invocation of `op` on the caller thread.
    pub fn call<Op>(&self, mut op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnMut() -> Result<T, E>,
    {
        let s = &self.strategies;
        s.fallback.execute_blocking(|| {
            s.retry.execute_blocking(|| {
                s.circuit_breaker.execute_blocking(|| {
                    s.rate_limit.execute_blocking(|| {
                        s.timeout.execute_blocking(|| {
                            s.bulkhead
                                .execute_blocking(|| op().map_err(FaultToleranceError::Inner))
                        })
                    })
                })
            })
        })
    }

    /// Bind `op` to this pipeline as a directly invocable action sharing the
    /// pipeline's strategy state.
    pub fn adapt<Op>(self: &Arc<Self>, op: Op) -> GuardedCall<T, E>
    where
        Op: FnMut() -> Result<T, E> + Send + 'static,
    {
        GuardedCall { pipeline: self.clone(), op: Arc::new(Mutex::new(Box::new(op))) }
    }
}

type BoundOp<T, E> = Box<dyn FnMut() -> Result<T, E> + Send>;

/// Synchronous action bound to a pipeline.
pub struct GuardedCall<T, E> {
    pipeline: Arc<SyncPipeline<T, E>>,
    op: Arc<Mutex<BoundOp<T, E>>>,
}

impl<T, E> Clone for GuardedCall<T, E> {
    fn clone(&self) -> Self {
        Self { pipeline: self.pipeline.clone(), op: self.op.clone() }
    }
}

impl<T, E> GuardedCall<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn invoke(&self) -> Result<T, FaultToleranceError<E>> {
        let op = self.op.clone();
        self.pipeline.call(move || {
            let mut guard = op.lock().unwrap_or_else(|p| p.into_inner());
            (*guard)()
        })
    }
}
