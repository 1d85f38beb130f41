// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Call guards for the WHOOP API: rate limiter, retry with backoff, and a
//! circuit breaker.
//!
//! Each guard is independent and composed explicitly by the caller. All
//! timing uses `tokio::time`, so tests can run against paused time.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{BreakerSettings, RetrySettings};

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiter
// ─────────────────────────────────────────────────────────────────────────────

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter: at most `ceiling` calls in any 60 second span.
pub struct RateLimiter {
    ceiling: usize,
    /// Instants of admitted calls still inside the window, oldest first
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` calls in any rolling minute.
    pub fn per_minute(per_minute: u32) -> Self {
        let ceiling = per_minute.max(1) as usize;
        Self {
            ceiling,
            admitted: Mutex::new(VecDeque::with_capacity(ceiling)),
        }
    }

    /// Admit one call, suspending until the window has room.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                while admitted
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= RATE_WINDOW)
                {
                    admitted.pop_front();
                }

                match admitted.front() {
                    Some(&oldest) if admitted.len() >= self.ceiling => {
                        (oldest + RATE_WINDOW).saturating_duration_since(now)
                    }
                    _ => {
                        admitted.push_back(now);
                        return;
                    }
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Classification used by [`RetryPolicy`] and [`CircuitBreaker`].
pub trait Transient {
    /// Whether the failure may succeed if tried again.
    fn is_transient(&self) -> bool;

    /// Minimum wait requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let mut delay = self.delay_for(attempt);
                    if let Some(requested) = e.retry_after() {
                        delay = delay.max(requested);
                    }
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Circuit breaker
// ─────────────────────────────────────────────────────────────────────────────

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of a guarded call.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the operation.
    Open,
    Inner(E),
}

struct BreakerInner {
    state: BreakerState,
    /// Most recent outcomes, `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Count-based rolling-window circuit breaker.
pub struct CircuitBreaker {
    name: &'static str,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, settings: BreakerSettings) -> Self {
        Self {
            name,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::with_capacity(settings.window_size),
                opened_at: None,
                trial_in_flight: false,
            }),
            settings,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Run `op` through the breaker. Only errors for which
    /// `counts_as_failure` returns true are recorded as failures.
    pub async fn call<T, E, F, Fut>(
        &self,
        op: F,
        counts_as_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(BreakerError::Open);
        }

        let mut permit = Permit {
            breaker: self,
            settled: false,
        };
        let result = op().await;
        let failed = matches!(&result, Err(e) if counts_as_failure(e));
        permit.settle(failed);

        result.map_err(BreakerError::Inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.settings.cooldown);
                if cooled {
                    tracing::info!(breaker = self.name, "Circuit breaker half-open, allowing trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                }
                cooled
            }
            BreakerState::HalfOpen if inner.trial_in_flight => false,
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                true
            }
        }
    }

    fn record(&self, failed: bool) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.trial_in_flight = false;
                if failed {
                    tracing::warn!(breaker = self.name, "Trial call failed, circuit breaker reopened");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                } else {
                    tracing::info!(breaker = self.name, "Circuit breaker closed");
                    inner.state = BreakerState::Closed;
                    inner.window.clear();
                    inner.opened_at = None;
                }
            }
            BreakerState::Closed => {
                inner.window.push_back(failed);
                while inner.window.len() > self.settings.window_size {
                    inner.window.pop_front();
                }

                let calls = inner.window.len();
                if calls < self.settings.minimum_calls {
                    return;
                }
                let failures = inner.window.iter().filter(|f| **f).count();
                let rate = failures as f64 / calls as f64;
                if rate >= self.settings.failure_rate_threshold {
                    tracing::warn!(
                        breaker = self.name,
                        failures,
                        calls,
                        cooldown_secs = self.settings.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.window.clear();
                }
            }
            // A call admitted before the breaker opened.
            BreakerState::Open => {}
        }
    }

    fn abandon(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Releases a half-open trial slot if the guarded future is dropped early.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon();
        }
    }
}
