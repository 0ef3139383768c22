//! Per-source circuit breaker.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ─────────────────────────────────────────▶ Open
//!     ▲                                                │
//!     │ success_threshold                              │ recovery_timeout elapsed
//!     │ consecutive successes                          ▼
//!     └──────────────────────────────────────────── HalfOpen
//!                      any failure ──▶ Open (opened_at reset)
//! ```
//!
//! While Open, calls are rejected with [`SourceError::CircuitOpen`] before
//! reaching the network. The recovery timeout is evaluated lazily on the
//! next call, so no background task is needed.
//!
//! Every admitted call holds a [`CallPermit`]. A permit dropped without a
//! recorded outcome (the caller's future was cancelled) gives its half-open
//! probe slot back, so a cancelled probe cannot wedge the breaker.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Concurrent probe calls admitted while half-open.
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_recovery_timeout_secs() -> u64 {
    60
}
fn default_half_open_max_probes() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::external()
    }
}

impl BreakerConfig {
    /// Fast-recovering local or cache-like sources.
    pub fn internal() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: 30,
            half_open_max_probes: default_half_open_max_probes(),
        }
    }

    /// Slower external APIs.
    pub fn external() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Counters exposed for health and metadata reports.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
}

impl BreakerStats {
    /// Share of completed calls that succeeded (1.0 before any call).
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            1.0 - self.total_failures as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every entry into HalfOpen; ties probe slots to their round.
    probe_round: u64,
    total_calls: u64,
    total_failures: u64,
}

/// Failure-isolation state machine owned by a single source.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probes_in_flight: 0,
                probe_round: 0,
                total_calls: 0,
                total_failures: 0,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move Open → HalfOpen once the recovery timeout has elapsed.
    fn refresh(&self, s: &mut BreakerState, now: Instant) {
        if s.state != CircuitState::Open {
            return;
        }
        let elapsed = s
            .opened_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.recovery_timeout() {
            s.state = CircuitState::HalfOpen;
            s.consecutive_successes = 0;
            s.probes_in_flight = 0;
            s.probe_round += 1;
            tracing::info!(source = %self.name, "circuit half-open; probing");
        }
    }

    fn trip(&self, s: &mut BreakerState, now: Instant) {
        s.state = CircuitState::Open;
        s.opened_at = Some(now);
        s.consecutive_successes = 0;
        s.probes_in_flight = 0;
        tracing::warn!(
            source = %self.name,
            failures = s.consecutive_failures,
            recovery_secs = self.config.recovery_timeout_secs,
            "circuit opened"
        );
    }

    /// Current state, applying any pending recovery transition.
    pub fn state(&self) -> CircuitState {
        let mut s = self.lock();
        self.refresh(&mut s, Instant::now());
        s.state
    }

    pub fn stats(&self) -> BreakerStats {
        let mut s = self.lock();
        self.refresh(&mut s, Instant::now());
        BreakerStats {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            consecutive_successes: s.consecutive_successes,
            total_calls: s.total_calls,
            total_failures: s.total_failures,
        }
    }

    /// Admit a call or reject it without touching the network.
    ///
    /// The returned permit must be settled with its outcome; dropping it
    /// unsettled counts as neutral.
    pub fn acquire(&self) -> Result<CallPermit<'_>, SourceError> {
        let now = Instant::now();
        let mut s = self.lock();
        self.refresh(&mut s, now);
        match s.state {
            CircuitState::Closed => Ok(CallPermit::new(self, None)),
            CircuitState::Open => {
                let retry_after = s
                    .opened_at
                    .map(|at| (at + self.config.recovery_timeout()).saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO);
                Err(SourceError::CircuitOpen { retry_after })
            }
            CircuitState::HalfOpen => {
                if s.probes_in_flight < self.config.half_open_max_probes {
                    s.probes_in_flight += 1;
                    Ok(CallPermit::new(self, Some(s.probe_round)))
                } else {
                    Err(SourceError::CircuitOpen {
                        retry_after: Duration::ZERO,
                    })
                }
            }
        }
    }

    /// Give back a probe slot taken in the current half-open round.
    fn release_probe(s: &mut BreakerState, probe: Option<u64>) {
        if s.state == CircuitState::HalfOpen && probe == Some(s.probe_round) {
            s.probes_in_flight = s.probes_in_flight.saturating_sub(1);
        }
    }

    fn on_success(&self, probe: Option<u64>) {
        let mut s = self.lock();
        s.total_calls += 1;
        Self::release_probe(&mut s, probe);
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                s.consecutive_successes += 1;
                if s.consecutive_successes >= self.config.success_threshold {
                    s.state = CircuitState::Closed;
                    s.consecutive_failures = 0;
                    s.consecutive_successes = 0;
                    s.opened_at = None;
                    tracing::info!(source = %self.name, "circuit closed");
                }
            }
            // A call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: Option<u64>) {
        let now = Instant::now();
        let mut s = self.lock();
        s.total_calls += 1;
        s.total_failures += 1;
        Self::release_probe(&mut s, probe);
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures += 1;
                s.consecutive_successes = 0;
                if s.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut s, now);
                }
            }
            CircuitState::HalfOpen => {
                s.consecutive_failures += 1;
                self.trip(&mut s, now);
            }
            CircuitState::Open => {}
        }
    }

    fn on_neutral(&self, probe: Option<u64>) {
        let mut s = self.lock();
        Self::release_probe(&mut s, probe);
    }

    /// Operator reset back to Closed.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.state = CircuitState::Closed;
        s.consecutive_failures = 0;
        s.consecutive_successes = 0;
        s.opened_at = None;
        s.probes_in_flight = 0;
        tracing::info!(source = %self.name, "circuit reset by operator");
    }

    /// Run `call` under the breaker, recording its outcome.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let permit = self.acquire()?;
        let result = call().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.is_breaker_failure() => permit.failure(),
            Err(_) => permit.neutral(),
        }
        result
    }
}

/// Admission for one call through a [`CircuitBreaker`].
#[must_use = "a permit records nothing until it is settled"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Half-open round this permit holds a probe slot in.
    probe: Option<u64>,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// The outcome says nothing about the backend's health.
    pub fn neutral(mut self) {
        self.settled = true;
        self.breaker.on_neutral(self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(source = %self.breaker.name, "call cancelled before completion");
            self.breaker.on_neutral(self.probe);
        }
    }
}
