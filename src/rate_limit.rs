//! Adaptive per-source rate limiter.
//!
//! Each source owns one [`RateLimiter`]. A request is admitted only when
//! three independent gates pass at the same time:
//!
//! | Gate | Blocks when | Outcome |
//! |------|-------------|---------|
//! | Self quota | `self_quota_used >= self_quota_limit` in the current hour | fail fast, [`QuotaKind::SelfQuota`] |
//! | Provider quota | provider-reported remaining `<= safety_buffer` before its reset | fail fast, [`QuotaKind::ProviderQuota`] |
//! | Minimum interval | less than `min_interval_ms` since the previous request | wait, then proceed |
//!
//! The self quota is a fraction (default 10%) of the provider's advertised
//! hourly limit, leaving headroom for other consumers of the same credential
//! and for skew between our window and the provider's.
//!
//! Provider quota snapshots (e.g. `X-RateLimit-Remaining` headers) take
//! precedence over the locally decremented estimate.
//!
//! Timing uses [`tokio::time::Instant`], so tests drive the limiter with a
//! paused runtime clock.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{QuotaKind, SourceError};

/// Length of the self-quota window.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Provider's advertised request limit per hour.
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,
    /// Share of the advertised limit this process allows itself.
    #[serde(default = "default_self_quota_fraction")]
    pub self_quota_fraction: f64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Provider remaining quota at or below this value blocks requests.
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer: u32,
}

fn default_requests_per_hour() -> u32 {
    5000
}
fn default_self_quota_fraction() -> f64 {
    0.1
}
fn default_min_interval_ms() -> u64 {
    100
}
fn default_safety_buffer() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: default_requests_per_hour(),
            self_quota_fraction: default_self_quota_fraction(),
            min_interval_ms: default_min_interval_ms(),
            safety_buffer: default_safety_buffer(),
        }
    }
}

impl RateLimitConfig {
    /// Limits for local sources that have no provider quota.
    pub fn unmetered() -> Self {
        Self {
            requests_per_hour: u32::MAX,
            self_quota_fraction: 1.0,
            min_interval_ms: 0,
            safety_buffer: 0,
        }
    }

    /// Requests this process may make per window.
    pub fn self_quota_limit(&self) -> u32 {
        let limit = (self.requests_per_hour as f64 * self.self_quota_fraction).floor();
        (limit as u32).max(1)
    }
}

/// Quota state reported by the provider alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub remaining: u32,
    /// Time until the provider's window resets, if reported.
    pub reset_in: Option<Duration>,
}

/// A response value plus whatever quota information came with it.
#[derive(Debug, Clone)]
pub struct Metered<T> {
    pub value: T,
    pub quota: Option<QuotaSnapshot>,
}

impl<T> Metered<T> {
    /// Wrap a value that carried no quota information.
    pub fn plain(value: T) -> Self {
        Self { value, quota: None }
    }

    pub fn with_quota(value: T, quota: Option<QuotaSnapshot>) -> Self {
        Self { value, quota }
    }
}

/// Serializable view of a limiter for health and metadata reports.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RateLimitStatus {
    pub self_quota_used: u32,
    pub self_quota_limit: u32,
    pub provider_remaining: Option<u32>,
    pub window_resets_in_ms: u64,
    pub min_interval_ms: u64,
}

#[derive(Debug)]
struct LimiterState {
    provider_remaining: Option<u32>,
    provider_reset_at: Option<Instant>,
    self_quota_used: u32,
    window_started_at: Instant,
    last_request_at: Option<Instant>,
}

/// Three-gate throttle owned by a single source.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    self_quota_limit: u32,
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        let self_quota_limit = config.self_quota_limit();
        let min_interval = Duration::from_millis(config.min_interval_ms);
        Self {
            name: name.into(),
            config,
            self_quota_limit,
            min_interval,
            state: Mutex::new(LimiterState {
                provider_remaining: None,
                provider_reset_at: None,
                self_quota_used: 0,
                window_started_at: Instant::now(),
                last_request_at: None,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate all gates without mutating state.
    ///
    /// Returns the interval wait still required, or the quota error.
    fn check(&self, s: &LimiterState, now: Instant) -> Result<Duration, SourceError> {
        let window_end = s.window_started_at + QUOTA_WINDOW;
        let used = if now >= window_end {
            0
        } else {
            s.self_quota_used
        };
        if used >= self.self_quota_limit {
            return Err(SourceError::RateLimited {
                kind: QuotaKind::SelfQuota,
                retry_after: window_end.saturating_duration_since(now),
            });
        }

        if let Some(remaining) = s.provider_remaining {
            let reset_passed = s.provider_reset_at.map(|r| now >= r).unwrap_or(false);
            if !reset_passed && remaining <= self.config.safety_buffer {
                let retry_after = match s.provider_reset_at {
                    Some(r) => r.saturating_duration_since(now),
                    None => window_end.saturating_duration_since(now),
                };
                return Err(SourceError::RateLimited {
                    kind: QuotaKind::ProviderQuota,
                    retry_after,
                });
            }
        }

        let wait = s
            .last_request_at
            .map(|last| (last + self.min_interval).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        Ok(wait)
    }

    /// Whether a request issued right now would be admitted without waiting.
    pub fn can_make_request(&self) -> bool {
        let s = self.lock();
        matches!(self.check(&s, Instant::now()), Ok(wait) if wait.is_zero())
    }

    /// Claim a request slot, returning how long to wait before using it.
    ///
    /// The slot is counted before the lock is released, so concurrent
    /// callers on the same source never double-spend the quota.
    fn reserve(&self) -> Result<Duration, SourceError> {
        let now = Instant::now();
        let mut s = self.lock();

        if now >= s.window_started_at + QUOTA_WINDOW {
            s.window_started_at = now;
            s.self_quota_used = 0;
        }
        if s.provider_reset_at.map(|r| now >= r).unwrap_or(false) {
            s.provider_remaining = None;
            s.provider_reset_at = None;
        }

        let wait = self.check(&s, now)?;
        s.self_quota_used += 1;
        if let Some(remaining) = s.provider_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        s.last_request_at = Some(now + wait);
        Ok(wait)
    }

    /// Apply quota information reported by the provider.
    ///
    /// A snapshot without a reset hint expires with the current self-quota
    /// window, so a low `remaining` can never block the source indefinitely.
    pub fn apply_snapshot(&self, snapshot: QuotaSnapshot) {
        let now = Instant::now();
        let mut s = self.lock();
        let window_end = s.window_started_at + QUOTA_WINDOW;
        let reset_at = match snapshot.reset_in {
            Some(d) => now + d,
            None if window_end > now => window_end,
            None => now + QUOTA_WINDOW,
        };
        s.provider_remaining = Some(snapshot.remaining);
        s.provider_reset_at = Some(reset_at);
    }

    /// Run `call` once all gates admit it.
    ///
    /// Quota exhaustion fails fast with [`SourceError::RateLimited`]; the
    /// minimum-interval gate is waited out instead.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Metered<T>, SourceError>>,
    {
        let wait = self.reserve()?;
        if !wait.is_zero() {
            tracing::debug!(
                source = %self.name,
                wait_ms = wait.as_millis() as u64,
                "waiting out minimum request interval"
            );
            tokio::time::sleep(wait).await;
        }

        match call().await {
            Ok(metered) => {
                if let Some(snapshot) = metered.quota {
                    self.apply_snapshot(snapshot);
                }
                Ok(metered.value)
            }
            Err(e) => {
                if let SourceError::RateLimited {
                    kind: QuotaKind::Upstream,
                    retry_after,
                } = &e
                {
                    tracing::warn!(
                        source = %self.name,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "upstream rejected request with a rate limit"
                    );
                    self.apply_snapshot(QuotaSnapshot {
                        remaining: 0,
                        reset_in: Some(*retry_after),
                    });
                }
                Err(e)
            }
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let s = self.lock();
        let window_end = s.window_started_at + QUOTA_WINDOW;
        let used = if now >= window_end {
            0
        } else {
            s.self_quota_used
        };
        RateLimitStatus {
            self_quota_used: used,
            self_quota_limit: self.self_quota_limit,
            provider_remaining: s.provider_remaining,
            window_resets_in_ms: window_end.saturating_duration_since(now).as_millis() as u64,
            min_interval_ms: self.config.min_interval_ms,
        }
    }
}
