//! Jitter applied to retry delays to prevent thundering herds.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a computed retry delay.
#[derive(Debug, Clone)]
pub enum Jitter {
    /// No jitter, use the exact scheduler delay.
    None,
    /// Uniform jitter: the delay becomes `delay ± amplitude`, drawn uniformly
    /// and clamped at zero.
    Uniform { amplitude: Duration },
}

impl Jitter {
    /// Uniform jitter with the given amplitude.
    pub fn uniform(amplitude: Duration) -> Self {
        Jitter::Uniform { amplitude }
    }

    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Uniform { amplitude } => {
                let amplitude = amplitude.as_millis() as i64;
                if amplitude == 0 {
                    return delay;
                }
                let offset = rng.random_range(-amplitude..=amplitude);
                let base = delay.as_millis() as i64;
                Duration::from_millis(base.saturating_add(offset).max(0) as u64)
            }
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::None
    }
}
