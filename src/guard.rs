//! Upstream call guard combining the circuit breaker, rate limiter, and timeout.
//!
//! Every call a source makes to its backend goes through
//! [`SourceGuard::call`]:
//!
//! ```text
//! breaker.acquire ──▶ limiter gates ──▶ timeout(call) ──▶ record outcome
//! ```
//!
//! The breaker is consulted first so a known-broken backend never spends
//! rate-limit budget. A timeout is reported as [`SourceError::Timeout`] and
//! counts as a failure, exactly like a refused connection.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::circuit::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
use crate::error::SourceError;
use crate::rate_limit::{Metered, RateLimitConfig, RateLimitStatus, RateLimiter};

#[derive(Debug, Default)]
struct LatencyStats {
    calls: u64,
    total_ms: u64,
}

/// The rate limiter and circuit breaker owned by one source.
#[derive(Debug)]
pub struct SourceGuard {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    timeout: Duration,
    latency: Mutex<LatencyStats>,
}

impl SourceGuard {
    pub fn new(
        name: &str,
        rate_limit: RateLimitConfig,
        breaker: BreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, breaker),
            limiter: RateLimiter::new(name, rate_limit),
            timeout,
            latency: Mutex::new(LatencyStats::default()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker_stats(&self) -> BreakerStats {
        self.breaker.stats()
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    /// Mean latency of calls that reached the backend.
    pub fn avg_response_time_ms(&self) -> f64 {
        let stats = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if stats.calls == 0 {
            0.0
        } else {
            stats.total_ms as f64 / stats.calls as f64
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut stats = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        stats.calls += 1;
        stats.total_ms += elapsed.as_millis() as u64;
    }

    /// Execute an upstream call under breaker, limiter, and timeout.
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Metered<T>, SourceError>>,
    {
        let timeout = self.timeout;
        self.breaker
            .execute(move || {
                self.limiter.execute(move || async move {
                    let started = tokio::time::Instant::now();
                    let outcome = tokio::time::timeout(timeout, call()).await;
                    self.record_latency(started.elapsed());
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::Timeout(timeout)),
                    }
                })
            })
            .await
    }
}
