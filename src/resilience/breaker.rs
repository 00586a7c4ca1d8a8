//! Circuit Breaker
//!
//! Per-service failure isolation. A breaker counts outcomes in a tumbling
//! window while `Closed`, trips to `Open` once the failure rate reaches the
//! configured fraction, rejects calls until `reset_timeout` elapses, then lets
//! exactly one trial call through in `HalfOpen`.
//!
//! ```text
//!            failure rate ≥ threshold
//!   Closed ─────────────────────────────▶ Open
//!     ▲                                   │  ▲
//!     │ trial ok        reset_timeout     │  │ trial failed
//!     │                 elapsed           ▼  │
//!     └──────────────────────────────── HalfOpen
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_serde;
use crate::error::{BoxError, Error, Result};

/// Pending transitions kept for the owner to drain
const MAX_PENDING_TRANSITIONS: usize = 32;

// =============================================================================
// Configuration
// =============================================================================

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure fraction (0, 1] at which the breaker opens
    pub failure_threshold: f64,

    /// Time spent `Open` before a trial call is allowed
    #[serde(with = "duration_serde")]
    pub reset_timeout: Duration,

    /// Calls required in the window before the rate is evaluated
    pub minimum_calls: u32,

    /// Length of the tumbling evaluation window
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            reset_timeout: Duration::from_secs(30),
            minimum_calls: 2,
            window: Duration::from_secs(10),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_minimum_calls(mut self, calls: u32) -> Self {
        self.minimum_calls = calls;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Reject thresholds the state machine cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(Error::Validation(format!(
                "failure_threshold must be in (0, 1], got {}",
                self.failure_threshold
            )));
        }
        if self.reset_timeout.is_zero() {
            return Err(Error::Validation("reset_timeout must be > 0".into()));
        }
        if self.window.is_zero() {
            return Err(Error::Validation("window must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// State
// =============================================================================

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// One trial call decides the next state
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state change, drained by the owner with [`CircuitBreaker::take_transitions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub is_open: bool,
    pub failure_rate: f64,
    pub window_calls: u32,
    pub window_failures: u32,
    pub rejected: u64,
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window_started: Instant,
    window_calls: u32,
    window_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    rejected: u64,
    pending: VecDeque<Transition>,
}

impl BreakerInner {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            window_started: now,
            window_calls: 0,
            window_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            rejected: 0,
            pending: VecDeque::new(),
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_started) >= window {
            self.reset_window(now);
        }
    }

    fn reset_window(&mut self, now: Instant) {
        self.window_started = now;
        self.window_calls = 0;
        self.window_failures = 0;
    }

    fn failure_rate(&self) -> f64 {
        if self.window_calls == 0 {
            0.0
        } else {
            self.window_failures as f64 / self.window_calls as f64
        }
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        if self.pending.len() == MAX_PENDING_TRANSITIONS {
            self.pending.pop_front();
        }
        self.pending.push_back(Transition { from, to });
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Failure-isolation guard around one service
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Releases a half-open trial slot if the call is dropped before reporting.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a breaker in the `Closed` state
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new(Instant::now())),
        }
    }

    /// Breaker name (the service id)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured thresholds
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True while calls are being rejected
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Failure fraction of the current window
    pub fn failure_rate(&self) -> f64 {
        self.inner.lock().failure_rate()
    }

    /// Snapshot of counters and state
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            is_open: inner.state == CircuitState::Open,
            failure_rate: inner.failure_rate(),
            window_calls: inner.window_calls,
            window_failures: inner.window_failures,
            rejected: inner.rejected,
            open_for_ms: inner
                .opened_at
                .filter(|_| inner.state != CircuitState::Closed)
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Drain transitions recorded since the last call
    pub fn take_transitions(&self) -> Vec<Transition> {
        self.inner.lock().pending.drain(..).collect()
    }

    /// Force the breaker back to `Closed` with empty counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.transition(CircuitState::Closed);
        inner.reset_window(now);
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    /// Run `make_call` through the breaker.
    ///
    /// `make_call` is only invoked when the breaker admits the call. When
    /// `timeout` elapses first the call future is dropped and `Timeout` is
    /// returned.
    pub async fn call<T, F, Fut>(&self, timeout: Option<Duration>, make_call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let trial = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };

        let fut = make_call();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(|source| self.underlying(source)),
                Err(_) => Err(Error::Timeout {
                    service_id: self.name.clone(),
                    timeout: limit,
                }),
            },
            None => fut.await.map_err(|source| self.underlying(source)),
        };

        guard.armed = false;
        match &outcome {
            Ok(_) => self.on_success(trial),
            Err(_) => self.on_failure(trial),
        }

        outcome
    }

    fn underlying(&self, source: BoxError) -> Error {
        Error::Underlying {
            service_id: self.name.clone(),
            source,
        }
    }

    /// Admit or reject a call. Returns whether the call is the half-open trial.
    fn acquire(&self) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.roll_window(now, self.config.window);
                Ok(false)
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.config.reset_timeout {
                    inner.transition(CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    debug!(breaker = %self.name, "Circuit half-open, admitting trial call");
                    Ok(true)
                } else {
                    inner.rejected += 1;
                    Err(Error::CircuitOpen {
                        service_id: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected += 1;
                    Err(Error::CircuitOpen {
                        service_id: self.name.clone(),
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.opened_at = None;
                inner.reset_window(now);
                inner.transition(CircuitState::Closed);
                info!(breaker = %self.name, "Circuit closed after successful trial call");
            }
            CircuitState::Closed => {
                inner.roll_window(now, self.config.window);
                inner.window_calls += 1;
            }
            // Late result of a call admitted before the breaker tripped
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.opened_at = Some(now);
                inner.transition(CircuitState::Open);
                warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.roll_window(now, self.config.window);
                inner.window_calls += 1;
                inner.window_failures += 1;

                let rate = inner.failure_rate();
                if inner.window_calls >= self.config.minimum_calls
                    && rate >= self.config.failure_threshold
                {
                    inner.opened_at = Some(now);
                    inner.transition(CircuitState::Open);
                    warn!(
                        breaker = %self.name,
                        failure_rate = rate,
                        calls = inner.window_calls,
                        "Circuit opened"
                    );
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
