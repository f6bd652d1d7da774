//! Registry for named circuit breakers.
//!
//! Only breakers given a name at build time are registered; programmatic
//! unnamed breakers are never tracked. Names are unique process-wide and a
//! duplicate registration fails the build. A pipeline deregisters its breaker
//! when dropped.

use crate::circuit_breaker::{BreakerCore, CircuitState, StateChangeCallback};
use crate::DefinitionError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Handle to inspect and control named circuit breakers.
#[derive(Default, Clone, Debug)]
pub struct CircuitBreakerMaintenance {
    inner: Arc<Mutex<HashMap<String, Arc<BreakerCore>>>>,
}

static GLOBAL: OnceLock<CircuitBreakerMaintenance> = OnceLock::new();

impl CircuitBreakerMaintenance {
    /// Registry private to the caller, mostly useful in tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by builders unless one is injected.
    pub fn global() -> &'static CircuitBreakerMaintenance {
        GLOBAL.get_or_init(CircuitBreakerMaintenance::default)
    }

    pub(crate) fn register(
        &self,
        name: &str,
        core: Arc<BreakerCore>,
    ) -> Result<(), DefinitionError> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if map.contains_key(name) {
            return Err(DefinitionError::DuplicateCircuitBreakerName(name.to_string()));
        }
        map.insert(name.to_string(), core);
        Ok(())
    }

    pub(crate) fn deregister(&self, name: &str) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).remove(name);
    }

    fn get(&self, name: &str) -> Option<Arc<BreakerCore>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).get(name).cloned()
    }

    /// Current state of a named breaker, if registered.
    pub fn current_state(&self, name: &str) -> Option<CircuitState> {
        self.get(name).map(|core| core.current_state())
    }

    /// Reset a named breaker to CLOSED with an empty rolling window.
    /// Returns an error when the name is not registered.
    pub fn reset(&self, name: &str) -> Result<(), String> {
        match self.get(name) {
            Some(core) => {
                core.reset();
                Ok(())
            }
            None => Err(format!("circuit breaker not found: {name}")),
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        let cores: Vec<Arc<BreakerCore>> = {
            let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.values().cloned().collect()
        };
        for core in cores {
            core.reset();
        }
    }

    /// Subscribe to state changes of a named breaker.
    /// Returns an error when the name is not registered.
    pub fn on_state_change<F>(&self, name: &str, callback: F) -> Result<(), String>
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(core) => {
                core.subscribe(Arc::new(callback) as StateChangeCallback);
                Ok(())
            }
            None => Err(format!("circuit breaker not found: {name}")),
        }
    }

    /// Snapshot of all registered breakers, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(k, v)| (k.clone(), v.current_state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Removes the named breaker from its registry when the owning pipeline drops.
#[derive(Debug)]
pub(crate) struct RegistrationGuard {
    name: String,
    registry: CircuitBreakerMaintenance,
}

impl RegistrationGuard {
    pub(crate) fn new(name: String, registry: CircuitBreakerMaintenance) -> Self {
        Self { name, registry }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> Arc<BreakerCore> {
        Arc::new(BreakerCore::new(4))
    }

    #[test]
    fn duplicate_names_are_fatal() {
        let registry = CircuitBreakerMaintenance::new();
        registry.register("payments", core()).unwrap();
        let err = registry.register("payments", core()).unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateCircuitBreakerName("payments".into()));
    }

    #[test]
    fn unknown_names_error_on_reset_and_subscribe() {
        let registry = CircuitBreakerMaintenance::new();
        assert!(registry.reset("nope").is_err());
        assert!(registry.on_state_change("nope", |_, _| {}).is_err());
        assert!(registry.current_state("nope").is_none());
    }

    #[test]
    fn snapshot_is_sorted_and_reset_all_closes_everything() {
        let registry = CircuitBreakerMaintenance::new();
        registry.register("b", core()).unwrap();
        registry.register("a", core()).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, "a");
        assert_eq!(snapshot[1].0, "b");
        assert!(snapshot.iter().all(|(_, s)| *s == CircuitState::Closed));

        registry.reset_all();
        assert_eq!(registry.current_state("a"), Some(CircuitState::Closed));
    }

    #[test]
    fn registration_guard_deregisters_on_drop() {
        let registry = CircuitBreakerMaintenance::new();
        registry.register("scoped", core()).unwrap();
        {
            let _guard = RegistrationGuard::new("scoped".into(), registry.clone());
        }
        assert!(registry.current_state("scoped").is_none());
        // Name is free again.
        registry.register("scoped", core()).unwrap();
    }
}
