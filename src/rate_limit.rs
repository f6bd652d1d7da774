//! Rate-limit strategy: at most `limit` invocations per window, with an
//! optional minimum spacing between consecutive invocations.
//!
//! Three window types:
//! - **Fixed**: non-overlapping intervals anchored at limiter creation. The
//!   counter and the spacing timestamp are consumed on *every* attempt,
//!   permitted or rejected.
//! - **Rolling**: a time-ordered log of the last admissions; an attempt is
//!   admitted while fewer than `limit` admissions lie within the trailing
//!   window. Only admissions mutate state.
//! - **Smooth**: a single next-permit instant paced at `window / limit` per
//!   admission; a would-be permit up to one window out is admitted, so short
//!   bursts after idle periods are allowed without ever exceeding the rate
//!   over longer intervals.
//!
//! All window accounting is serialised by a per-instance mutex; callbacks and
//! metrics fire outside it.

use crate::clock::Clock;
use crate::metrics::{run_callbacks, Callback, MetricsEvent, MetricsSink, NullSink};
use crate::FaultToleranceError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Window accounting flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitType {
    #[default]
    Fixed,
    Rolling,
    Smooth,
}

#[derive(Debug)]
struct FixedWindow {
    limit: u64,
    window: u64,
    counter: i64,
    next_refresh: u64,
    last_attempt: Option<u64>,
}

impl FixedWindow {
    fn new(limit: u64, window: u64, created: u64) -> Self {
        Self { limit, window, counter: limit as i64, next_refresh: created + window, last_attempt: None }
    }

    fn record(&mut self, now: u64, min_spacing: u64) -> Result<(), u64> {
        if now >= self.next_refresh {
            self.counter = self.limit as i64;
            // Smallest multiple of the window strictly beyond `now`.
            let periods = (now - self.next_refresh) / self.window + 1;
            self.next_refresh += periods * self.window;
        }

        let spacing_ok =
            self.last_attempt.map_or(true, |last| now.saturating_sub(last) >= min_spacing);
        let permitted = self.counter > 0 && spacing_ok;

        let hint = if permitted {
            0
        } else {
            let counter_hint =
                if self.counter <= 0 { self.next_refresh.saturating_sub(now) } else { 0 };
            let spacing_hint = if spacing_ok {
                0
            } else {
                self.last_attempt.map_or(0, |last| (last + min_spacing).saturating_sub(now))
            };
            counter_hint.max(spacing_hint)
        };

        // Attempted executions consume state whether or not they were permitted.
        self.counter -= 1;
        self.last_attempt = Some(now);

        if permitted {
            Ok(())
        } else {
            Err(hint)
        }
    }
}

#[derive(Debug)]
struct RollingWindow {
    limit: usize,
    window: u64,
    log: VecDeque<u64>,
}

impl RollingWindow {
    fn new(limit: usize, window: u64) -> Self {
        Self { limit, window, log: VecDeque::with_capacity(limit) }
    }

    fn record(&mut self, now: u64, min_spacing: u64) -> Result<(), u64> {
        while let Some(&oldest) = self.log.front() {
            if oldest + self.window <= now {
                self.log.pop_front();
            } else {
                break;
            }
        }

        let spacing_ok =
            self.log.back().map_or(true, |&last| now.saturating_sub(last) >= min_spacing);

        if self.log.len() < self.limit && spacing_ok {
            self.log.push_back(now);
            Ok(())
        } else {
            let capacity_hint = if self.log.len() >= self.limit {
                self.log.front().map_or(0, |&oldest| (oldest + self.window).saturating_sub(now))
            } else {
                0
            };
            let spacing_hint = if spacing_ok {
                0
            } else {
                self.log.back().map_or(0, |&last| (last + min_spacing).saturating_sub(now))
            };
            Err(capacity_hint.max(spacing_hint))
        }
    }
}

#[derive(Debug)]
struct SmoothWindow {
    window: u64,
    increment: f64,
    next_permit: f64,
    last_admit: Option<u64>,
}

impl SmoothWindow {
    fn new(limit: u64, window: u64, created: u64) -> Self {
        Self {
            window,
            increment: window as f64 / limit as f64,
            next_permit: (created + window) as f64,
            last_admit: None,
        }
    }

    fn record(&mut self, now: u64, min_spacing: u64) -> Result<(), u64> {
        let now_f = now as f64;
        let would_be = self.next_permit.max(now_f);
        let spacing_ok =
            self.last_admit.map_or(true, |last| now.saturating_sub(last) >= min_spacing);

        if would_be - now_f <= self.window as f64 && spacing_ok {
            self.next_permit = would_be + self.increment;
            self.last_admit = Some(now);
            Ok(())
        } else {
            let rate_hint = ((would_be - self.window as f64) - now_f).max(0.0).ceil() as u64;
            let spacing_hint = if spacing_ok {
                0
            } else {
                self.last_admit.map_or(0, |last| (last + min_spacing).saturating_sub(now))
            };
            Err(rate_hint.max(spacing_hint))
        }
    }
}

#[derive(Debug)]
enum WindowState {
    Fixed(FixedWindow),
    Rolling(RollingWindow),
    Smooth(SmoothWindow),
}

impl WindowState {
    fn record(&mut self, now: u64, min_spacing: u64) -> Result<(), u64> {
        match self {
            WindowState::Fixed(w) => w.record(now, min_spacing),
            WindowState::Rolling(w) => w.record(now, min_spacing),
            WindowState::Smooth(w) => w.record(now, min_spacing),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RateLimit {
    enabled: bool,
    state: Arc<Mutex<WindowState>>,
    min_spacing: u64,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn MetricsSink>,
    on_permitted: Vec<Callback>,
    on_rejected: Vec<Callback>,
}

impl std::fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimit")
            .field("enabled", &self.enabled)
            .field("min_spacing", &self.min_spacing)
            .finish()
    }
}

impl RateLimit {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        window_type: RateLimitType,
        limit: u64,
        window: Duration,
        min_spacing: Duration,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn MetricsSink>,
        on_permitted: Vec<Callback>,
        on_rejected: Vec<Callback>,
    ) -> Self {
        let window_millis = window.as_millis() as u64;
        let created = clock.now_millis();
        let state = match window_type {
            RateLimitType::Fixed => {
                WindowState::Fixed(FixedWindow::new(limit, window_millis, created))
            }
            RateLimitType::Rolling => {
                WindowState::Rolling(RollingWindow::new(limit as usize, window_millis))
            }
            RateLimitType::Smooth => {
                WindowState::Smooth(SmoothWindow::new(limit, window_millis, created))
            }
        };
        Self {
            enabled: true,
            state: Arc::new(Mutex::new(state)),
            min_spacing: min_spacing.as_millis() as u64,
            clock,
            sink,
            on_permitted,
            on_rejected,
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            state: Arc::new(Mutex::new(WindowState::Rolling(RollingWindow::new(0, 0)))),
            min_spacing: 0,
            clock: Arc::new(crate::clock::MonotonicClock::default()),
            sink: Arc::new(NullSink),
            on_permitted: Vec::new(),
            on_rejected: Vec::new(),
        }
    }

    fn check<E>(&self) -> Result<(), FaultToleranceError<E>> {
        let now = self.clock.now_millis();
        let decision = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.record(now, self.min_spacing)
        };
        match decision {
            Ok(()) => {
                self.sink.record(MetricsEvent::RateLimitDecision { permitted: true });
                run_callbacks("rate_limit.permitted", &self.on_permitted);
                Ok(())
            }
            Err(hint) => {
                tracing::debug!(retry_after_millis = hint, "rate limit exceeded");
                self.sink.record(MetricsEvent::RateLimitDecision { permitted: false });
                run_callbacks("rate_limit.rejected", &self.on_rejected);
                Err(FaultToleranceError::RateLimited { retry_after: Duration::from_millis(hint) })
            }
        }
    }

    pub(crate) async fn execute<T, E, Fut, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, FaultToleranceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        if self.enabled {
            self.check()?;
        }
        op().await
    }

    pub(crate) fn execute_blocking<T, E, Op>(&self, op: Op) -> Result<T, FaultToleranceError<E>>
    where
        Op: FnOnce() -> Result<T, FaultToleranceError<E>>,
    {
        if self.enabled {
            self.check()?;
        }
        op()
    }
}
