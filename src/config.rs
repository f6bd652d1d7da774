//! Process-wide configuration.
//!
//! Exactly one property is recognised: `MP_Fault_Tolerance_NonFallback_Enabled`.
//! When it reads `false`, every non-fallback strategy except thread-offload is
//! elided from built pipelines. The property is read once, at the first
//! pipeline construction.

use std::sync::OnceLock;

/// The single recognised property name.
pub const NON_FALLBACK_ENABLED_PROPERTY: &str = "MP_Fault_Tolerance_NonFallback_Enabled";

/// Source of configuration values; the reading backend is an external
/// collaborator.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads configuration from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Resolved process-wide switches.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// When false, pipelines keep only fallback and thread-offload.
    pub non_fallback_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { non_fallback_enabled: true }
    }
}

static GLOBAL: OnceLock<RuntimeConfig> = OnceLock::new();

impl RuntimeConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let non_fallback_enabled = source
            .get(NON_FALLBACK_ENABLED_PROPERTY)
            .map_or(true, |v| !v.trim().eq_ignore_ascii_case("false"));
        Self { non_fallback_enabled }
    }

    /// The process-wide configuration, resolved from the environment at the
    /// first call and frozen afterwards.
    pub fn global() -> RuntimeConfig {
        *GLOBAL.get_or_init(|| RuntimeConfig::from_source(&EnvConfigSource))
    }
}
