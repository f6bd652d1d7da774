//! Delay schedulers for the retry strategy.

use std::sync::Arc;
use std::time::Duration;

/// Default cap applied to growing schedules when none is configured.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Function signature for user-supplied schedules: `(attempt, last_error)` to
/// the delay before that attempt. Attempts are 1-indexed.
pub type CustomDelayFn =
    dyn Fn(u32, Option<&(dyn std::error::Error + 'static)>) -> Duration + Send + Sync;

/// Delay schedule between retry attempts.
///
/// A `max` of [`Duration::ZERO`] means uncapped.
#[derive(Clone)]
pub enum Backoff {
    /// Fixed delay between retries.
    Constant { delay: Duration },
    /// `delay * factor^(attempt-1)`, capped at `max`.
    Exponential { delay: Duration, factor: u32, max: Duration },
    /// `fib(attempt) * delay`, capped at `max`.
    Fibonacci { delay: Duration, max: Duration },
    /// User-supplied schedule.
    Custom(Arc<CustomDelayFn>),
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backoff::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Backoff::Exponential { delay, factor, max } => f
                .debug_struct("Exponential")
                .field("delay", delay)
                .field("factor", factor)
                .field("max", max)
                .finish(),
            Backoff::Fibonacci { delay, max } => {
                f.debug_struct("Fibonacci").field("delay", delay).field("max", max).finish()
            }
            Backoff::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Backoff {
    /// Fixed delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Doubling schedule capped at [`DEFAULT_MAX_DELAY`].
    pub fn exponential(delay: Duration) -> Self {
        Backoff::Exponential { delay, factor: 2, max: DEFAULT_MAX_DELAY }
    }

    /// Exponential schedule with an explicit factor.
    pub fn exponential_with_factor(delay: Duration, factor: u32) -> Self {
        Backoff::Exponential { delay, factor, max: DEFAULT_MAX_DELAY }
    }

    /// Fibonacci schedule capped at [`DEFAULT_MAX_DELAY`].
    pub fn fibonacci(delay: Duration) -> Self {
        Backoff::Fibonacci { delay, max: DEFAULT_MAX_DELAY }
    }

    /// User-supplied schedule.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, Option<&(dyn std::error::Error + 'static)>) -> Duration
            + Send
            + Sync
            + 'static,
    {
        Backoff::Custom(Arc::new(f))
    }

    /// Replace the cap on a growing schedule. [`Duration::ZERO`] removes it.
    pub fn with_max(mut self, new_max: Duration) -> Self {
        match &mut self {
            Backoff::Exponential { max, .. } | Backoff::Fibonacci { max, .. } => *max = new_max,
            _ => {}
        }
        self
    }

    /// Delay before the given attempt (1-indexed).
    pub fn delay_for(
        &self,
        attempt: u32,
        last_error: Option<&(dyn std::error::Error + 'static)>,
    ) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Exponential { delay, factor, max } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.saturating_pow(exponent);
                let raw = delay.checked_mul(multiplier).unwrap_or(Duration::MAX);
                cap(raw, *max)
            }
            Backoff::Fibonacci { delay, max } => {
                let raw = delay.checked_mul(fibonacci(attempt)).unwrap_or(Duration::MAX);
                cap(raw, *max)
            }
            Backoff::Custom(f) => f(attempt, last_error),
        }
    }
}

fn cap(delay: Duration, max: Duration) -> Duration {
    if max.is_zero() {
        delay
    } else {
        delay.min(max)
    }
}

/// fib(1) = fib(2) = 1, saturating.
fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(100, None), Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3, None), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4, None), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_honors_factor() {
        let backoff = Backoff::exponential_with_factor(Duration::from_millis(10), 3);
        assert_eq!(backoff.delay_for(1, None), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(2, None), Duration::from_millis(30));
        assert_eq!(backoff.delay_for(3, None), Duration::from_millis(90));
    }

    #[test]
    fn exponential_backoff_caps_at_default_max() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay_for(30, None), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn with_max_zero_removes_the_cap() {
        let backoff = Backoff::exponential(Duration::from_secs(1)).with_max(Duration::ZERO);
        assert!(backoff.delay_for(30, None) > DEFAULT_MAX_DELAY);
    }

    #[test]
    fn fibonacci_backoff_follows_the_sequence() {
        let backoff = Backoff::fibonacci(Duration::from_millis(100)).with_max(Duration::ZERO);
        assert_eq!(backoff.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2, None), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3, None), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4, None), Duration::from_millis(300));
        assert_eq!(backoff.delay_for(5, None), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(6, None), Duration::from_millis(800));
    }

    #[test]
    fn fibonacci_backoff_respects_cap() {
        let backoff = Backoff::fibonacci(Duration::from_millis(100)).with_max(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(4, None), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(10, None), Duration::from_millis(250));
    }

    #[test]
    fn custom_backoff_sees_attempt_and_error() {
        let backoff = Backoff::custom(|attempt, err| {
            assert!(err.is_some());
            Duration::from_millis(u64::from(attempt) * 5)
        });
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "x");
        assert_eq!(backoff.delay_for(3, Some(&io_err)), Duration::from_millis(15));
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1)).with_max(Duration::ZERO);
        let delay = backoff.delay_for(64, None);
        assert!(delay > Duration::from_secs(1_000_000));
    }
}
