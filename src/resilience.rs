//! Resilience Guard
//!
//! Per-destination circuit breakers guarding the orchestrator's synchronous
//! calls into the ledger.
//!
//! ```text
//!            max_failures consecutive failures
//!   CLOSED ─────────────────────────────────────▶ OPEN
//!     ▲                                            │ timeout elapsed
//!     │ half_open_max_calls successes              ▼
//!     └──────────────────────────────────────── HALF_OPEN
//!                    any failure ──▶ OPEN
//! ```
//!
//! Breaker state is process-local. Reads take the read lock; transitions
//! take the write lock and re-check the state, so no more than
//! `half_open_max_calls` trial calls are ever admitted per half-open window.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub max_failures: u32,
    /// Time spent OPEN before probing
    pub timeout: Duration,
    pub half_open_max_calls: u32,
    /// Deadline for each guarded call; expiry counts as a failure
    pub call_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            half_open_max_calls: config.half_open_max_calls.max(1),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker for {0} is open")]
    Open(String),

    #[error("call to {0} timed out")]
    Timeout(String),

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn code(&self) -> &'static str {
        match self {
            BreakerError::Open(_) => "CIRCUIT_OPEN",
            BreakerError::Timeout(_) => "TIMEOUT",
            BreakerError::Inner(_) => "UPSTREAM_ERROR",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    /// Trial calls admitted in the current half-open window
    trials: u32,
    /// Successful trial calls in the current half-open window
    successes: u32,
    /// Bumped on every OPEN -> HALF_OPEN transition
    window: u64,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                trials: 0,
                successes: 0,
                window: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.read().state
    }

    pub fn failure_count(&self) -> u32 {
        self.read().failures
    }

    // Poisoning only means another caller panicked mid-update; the counters
    // are still usable.
    fn read(&self) -> RwLockReadGuard<'_, BreakerInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn cooled_down(&self, inner: &BreakerInner) -> bool {
        inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.settings.timeout)
    }

    /// Decide whether a call may go out now
    fn try_acquire(&self) -> Option<Permit<'_>> {
        {
            let inner = self.read();
            match inner.state {
                BreakerState::Closed => return Some(Permit::new(self, None)),
                BreakerState::Open if !self.cooled_down(&inner) => return None,
                _ => {}
            }
        }

        let mut inner = self.write();
        match inner.state {
            BreakerState::Closed => Some(Permit::new(self, None)),
            BreakerState::Open => {
                if !self.cooled_down(&inner) {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                inner.trials = 1;
                inner.successes = 0;
                inner.window += 1;
                info!(destination = %self.name, "Circuit breaker half-open, probing");
                Some(Permit::new(self, Some(inner.window)))
            }
            BreakerState::HalfOpen => {
                if inner.trials < self.settings.half_open_max_calls {
                    inner.trials += 1;
                    Some(Permit::new(self, Some(inner.window)))
                } else {
                    None
                }
            }
        }
    }

    /// Give back a trial slot whose call never produced an outcome
    fn release_trial(&self, window: u64) {
        let mut inner = self.write();
        if inner.state == BreakerState::HalfOpen && inner.window == window && inner.trials > 0 {
            inner.trials -= 1;
            debug!(destination = %self.name, "Trial call abandoned, slot released");
        }
    }

    fn on_success(&self) {
        let mut inner = self.write();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.settings.half_open_max_calls {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.trials = 0;
                    inner.successes = 0;
                    info!(destination = %self.name, "Circuit breaker closed");
                }
            }
            // a call admitted before the breaker opened
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.write();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.settings.max_failures {
                    inner.state = BreakerState::Open;
                    warn!(
                        destination = %self.name,
                        failures = inner.failures,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.trials = 0;
                inner.successes = 0;
                warn!(destination = %self.name, "Circuit breaker re-opened from half-open");
            }
            BreakerState::Open => {}
        }
    }

    /// Run `fut` through the breaker; every error counts as a failure.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(fut, |_| true).await
    }

    /// Run `fut` through the breaker. Errors for which `is_failure` returns
    /// false (e.g. business rejections from a healthy upstream) are returned
    /// to the caller but recorded as successes.
    pub async fn call_with<T, E, Fut, P>(&self, fut: Fut, is_failure: P) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let Some(permit) = self.try_acquire() else {
            debug!(destination = %self.name, "Call rejected, circuit open");
            return Err(BreakerError::Open(self.name.clone()));
        };

        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                if is_failure(&e) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                warn!(
                    destination = %self.name,
                    timeout_ms = self.settings.call_timeout.as_millis() as u64,
                    "Guarded call timed out"
                );
                permit.failure();
                Err(BreakerError::Timeout(self.name.clone()))
            }
        }
    }
}

/// Admission for one guarded call. Dropped without an outcome (the caller's
/// future was cancelled), it hands its half-open trial slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial_window: Option<u64>,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial_window: Option<u64>) -> Self {
        Self {
            breaker,
            trial_window,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled
            && let Some(window) = self.trial_window
        {
            self.breaker.release_trial(window);
        }
    }
}

/// One breaker per destination, created on first use
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, destination: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(destination) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(destination.to_string())
            .or_insert_with(|| {
                debug!(destination, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(destination, self.settings.clone()))
            })
            .clone()
    }

    /// Current state of every known breaker
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
