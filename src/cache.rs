//! Shared-state cache keyed by interception point.
//!
//! Stateful strategies attached to the same guarded target must share state
//! across invocations. The cache builds a pipeline lazily at the first call
//! per point and hands out the shared instance afterwards.

use crate::DefinitionError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Stable identity of a guarded target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterceptionPoint {
    class: String,
    method: String,
}

impl InterceptionPoint {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self { class: class.into(), method: method.into() }
    }
}

impl std::fmt::Display for InterceptionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.class, self.method)
    }
}

/// Lazily populated map of interception point to shared pipeline.
#[derive(Default, Clone)]
pub struct StrategyCache {
    inner: Arc<Mutex<HashMap<InterceptionPoint, Arc<dyn Any + Send + Sync>>>>,
}

impl std::fmt::Debug for StrategyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCache").field("entries", &self.len()).finish()
    }
}

static GLOBAL: OnceLock<StrategyCache> = OnceLock::new();

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static StrategyCache {
        GLOBAL.get_or_init(StrategyCache::default)
    }

    /// Fetch the pipeline for `point`, building it on the first call.
    pub fn get_or_build<P, F>(
        &self,
        point: &InterceptionPoint,
        build: F,
    ) -> Result<Arc<P>, DefinitionError>
    where
        P: Send + Sync + 'static,
        F: FnOnce() -> Result<P, DefinitionError>,
    {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = map.get(point) {
            if let Ok(pipeline) = existing.clone().downcast::<P>() {
                return Ok(pipeline);
            }
        }
        let built = Arc::new(build()?);
        map.insert(point.clone(), built.clone());
        Ok(built)
    }

    /// Drop the entry for `point`, if any. Subsequent calls rebuild.
    pub fn evict(&self, point: &InterceptionPoint) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).remove(point);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
