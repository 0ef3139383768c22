//! Typed errors for the retrieval core.
//!
//! Source adapters report failures as [`SourceError`], which lets the rate
//! limiter, the circuit breaker, and the registry tell infrastructure
//! failures apart from quota exhaustion. Malformed requests are rejected at
//! the registry boundary with a [`ValidationError`] before any fan-out.

use std::fmt;
use std::time::Duration;

/// Which quota gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// The self-imposed hourly budget is spent.
    SelfQuota,
    /// The provider-reported remaining quota is at or below the safety buffer.
    ProviderQuota,
    /// The upstream answered with HTTP 429.
    Upstream,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::SelfQuota => write!(f, "self-imposed quota exhausted"),
            QuotaKind::ProviderQuota => write!(f, "provider quota exhausted"),
            QuotaKind::Upstream => write!(f, "upstream rate limit"),
        }
    }
}

/// Failure of a single source adapter operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited ({kind}); retry in {}ms", .retry_after.as_millis())]
    RateLimited {
        kind: QuotaKind,
        retry_after: Duration,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("circuit breaker open; retry in {}ms", .retry_after.as_millis())]
    CircuitOpen { retry_after: Duration },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("io error: {0}")]
    Io(String),
}

impl SourceError {
    /// Whether this failure should count against the circuit breaker.
    ///
    /// Quota refusals and breaker rejections never reached the backend, and
    /// a malformed payload means the backend is up, so none of them count.
    pub fn is_breaker_failure(&self) -> bool {
        match self {
            SourceError::Auth(_)
            | SourceError::Network(_)
            | SourceError::Timeout(_)
            | SourceError::Io(_) => true,
            SourceError::Upstream { status, .. } => *status >= 500,
            SourceError::RateLimited { .. }
            | SourceError::CircuitOpen { .. }
            | SourceError::InvalidResponse(_) => false,
        }
    }

    /// Estimated wait before the same call could succeed, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after, .. }
            | SourceError::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

/// A malformed search request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("confidence_threshold must be within [0, 1], got {0}")]
    ConfidenceThreshold(f64),

    #[error("limit must be between 1 and {max}, got {got}")]
    Limit { got: usize, max: usize },

    #[error("max_age_days must be greater than zero")]
    MaxAgeDays,

    #[error("categories must not contain empty names")]
    EmptyCategory,

    #[error("alert_type must not be empty")]
    EmptyAlertType,
}

/// Failure of a registry-level operation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("all {count} sources failed; last error: {last}")]
    AllSourcesFailed { count: usize, last: SourceError },

    #[error("no source registered with name: {0}")]
    UnknownSource(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}
