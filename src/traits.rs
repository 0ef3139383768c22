//! The source adapter contract.
//!
//! Every documentation backend (local tree, HTTP documentation API, or a
//! custom in-process source) implements [`SourceAdapter`]. The
//! [`SourceRegistry`](crate::registry::SourceRegistry) holds them as trait
//! objects and fans requests out to all of them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SourceRegistry                │
//! │  ┌────────────┐ ┌────────────┐ ┌───────────┐ │
//! │  │ Filesystem │ │    HTTP    │ │  Custom   │ │
//! │  │   source   │ │   source   │ │  (Rust)   │ │
//! │  └─────┬──────┘ └─────┬──────┘ └─────┬─────┘ │
//! └────────┼──────────────┼──────────────┼───────┘
//!          ▼              ▼              ▼
//!    SourceGuard (breaker ▶ rate limiter ▶ timeout) per source
//!          ▼              ▼              ▼
//!       SearchEngine (fuzzy ▶ variations ▶ exact) per source
//! ```
//!
//! # Error contract
//!
//! "Nothing found" is never an error: `search` returns `Ok(vec![])` and
//! `get_document` returns `Ok(None)`. `Err` is reserved for infrastructure
//! failures (auth, network, timeout, quota, open circuit), which the
//! registry isolates per source.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{AlertContext, HealthCheck, SearchFilters, SearchResult, SourceMetadata, SourceType};
use crate::runbook::Runbook;

/// A documentation backend.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use runbook_harness::circuit::CircuitState;
/// use runbook_harness::error::SourceError;
/// use runbook_harness::models::*;
/// use runbook_harness::rate_limit::RateLimitStatus;
/// use runbook_harness::runbook::Runbook;
/// use runbook_harness::traits::SourceAdapter;
///
/// pub struct EmptySource;
///
/// #[async_trait]
/// impl SourceAdapter for EmptySource {
///     fn name(&self) -> &str { "empty" }
///     fn source_type(&self) -> SourceType { SourceType::Custom }
///
///     async fn search(&self, _q: &str, _f: &SearchFilters) -> Result<Vec<SearchResult>, SourceError> {
///         Ok(vec![])
///     }
///     async fn get_document(&self, _id: &str) -> Result<Option<SearchResult>, SourceError> {
///         Ok(None)
///     }
///     async fn search_runbooks(&self, _a: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
///         Ok(vec![])
///     }
///     async fn health_check(&self) -> Result<HealthCheck, SourceError> {
///         Err(SourceError::Network("not implemented".into()))
///     }
///     async fn refresh_index(&self, _force: bool) -> Result<bool, SourceError> {
///         Ok(false)
///     }
///     async fn get_metadata(&self) -> SourceMetadata {
///         SourceMetadata {
///             name: "empty".into(),
///             source_type: SourceType::Custom,
///             document_count: 0,
///             categories: vec![],
///             last_indexed: None,
///             avg_response_time_ms: 0.0,
///             success_rate: 1.0,
///             circuit_state: CircuitState::Closed,
///             rate_limit: RateLimitStatus::default(),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Instance name from the config; unique within a registry.
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Categories this source serves. Empty means all of them.
    fn categories(&self) -> &[String] {
        &[]
    }

    /// Ranked, confidence-scored results for a free-text query.
    ///
    /// Returns an empty set (without doing any matching work) when the
    /// requested categories do not intersect [`categories`](Self::categories).
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError>;

    /// One document by its source-scoped id.
    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, SourceError>;

    /// Runbooks for an alert, structured or synthesized.
    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError>;

    async fn health_check(&self) -> Result<HealthCheck, SourceError>;

    /// Rebuild the local index. Returns whether a rebuild happened.
    async fn refresh_index(&self, force: bool) -> Result<bool, SourceError>;

    async fn get_metadata(&self) -> SourceMetadata;
}
