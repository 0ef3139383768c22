//! Core data models shared by sources, the search engine, and the registry.
//!
//! [`SearchDocument`] is what a source hands to the search engine;
//! [`SearchResult`] is what the registry hands back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::circuit::CircuitState;
use crate::error::ValidationError;
use crate::rate_limit::RateLimitStatus;

/// Upper bound on [`SearchFilters::limit`].
pub const MAX_RESULT_LIMIT: usize = 100;

/// Kind of backend a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Filesystem,
    Http,
    Custom,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Filesystem => "filesystem",
            SourceType::Http => "http",
            SourceType::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Raw document produced by a source before ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Condensed text used for the heaviest-weighted match field.
    #[serde(default)]
    pub searchable_content: String,
    /// Path or location within the source (file path, URL path, space key).
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A ranked, confidence-scored result.
///
/// `id` is unique within `source` only; `(source, id)` is the global identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub source_type: SourceType,
    /// Relevance in `[0.0, 1.0]`.
    pub confidence_score: f64,
    pub match_reasons: Vec<String>,
    pub retrieval_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Last modification timestamp (ISO 8601).
    pub last_updated: String,
    pub metadata: Map<String, Value>,
}

/// Optional narrowing of a search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SearchFilters {
    /// Reject out-of-range values before any source is contacted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(t) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&t) || t.is_nan() {
                return Err(ValidationError::ConfidenceThreshold(t));
            }
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_RESULT_LIMIT {
                return Err(ValidationError::Limit {
                    got: limit,
                    max: MAX_RESULT_LIMIT,
                });
            }
        }
        if self.max_age_days == Some(0) {
            return Err(ValidationError::MaxAgeDays);
        }
        if let Some(cats) = &self.categories {
            if cats.iter().any(|c| c.trim().is_empty()) {
                return Err(ValidationError::EmptyCategory);
            }
        }
        Ok(())
    }

    /// Whether a source serving `configured` categories can answer this request.
    ///
    /// A source without configured categories serves everything. A request
    /// without categories accepts every source.
    pub fn accepts_categories(&self, configured: &[String]) -> bool {
        match &self.categories {
            None => true,
            Some(wanted) if wanted.is_empty() => true,
            Some(_) if configured.is_empty() => true,
            Some(wanted) => wanted
                .iter()
                .any(|w| configured.iter().any(|c| c.eq_ignore_ascii_case(w))),
        }
    }
}

/// The alert a runbook lookup is made for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub alert_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub affected_systems: Vec<String>,
}

impl AlertContext {
    pub fn new(alert_type: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity: severity.into(),
            affected_systems: Vec::new(),
        }
    }

    pub fn with_systems(mut self, systems: Vec<String>) -> Self {
        self.affected_systems = systems;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.alert_type.trim().is_empty() {
            return Err(ValidationError::EmptyAlertType);
        }
        Ok(())
    }
}

/// Health report for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub source_name: String,
    pub source_type: SourceType,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl HealthCheck {
    /// Record for a source whose health check itself failed.
    pub fn failed(source_name: &str, source_type: SourceType, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_type,
            healthy: false,
            response_time_ms: 0,
            last_check: Utc::now(),
            error_message: Some(message.into()),
            metadata: Map::new(),
        }
    }
}

/// Descriptive snapshot of a source and its guards.
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    pub name: String,
    pub source_type: SourceType,
    pub document_count: usize,
    pub categories: Vec<String>,
    pub last_indexed: Option<DateTime<Utc>>,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub circuit_state: CircuitState,
    pub rate_limit: RateLimitStatus,
}

/// Format a timestamp as ISO 8601 with second precision.
pub fn format_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_validate_ranges() {
        assert!(SearchFilters::default().validate().is_ok());

        let bad = SearchFilters {
            confidence_threshold: Some(1.5),
            ..Default::default()
        };
        assert_eq!(
            bad.validate(),
            Err(ValidationError::ConfidenceThreshold(1.5))
        );

        let bad = SearchFilters {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ValidationError::Limit { .. })));

        let bad = SearchFilters {
            max_age_days: Some(0),
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(ValidationError::MaxAgeDays));

        let bad = SearchFilters {
            categories: Some(vec!["ops".into(), " ".into()]),
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(ValidationError::EmptyCategory));
    }

    #[test]
    fn test_category_intersection() {
        let filters = SearchFilters {
            categories: Some(vec!["Runbooks".into()]),
            ..Default::default()
        };
        assert!(filters.accepts_categories(&["runbooks".into(), "kb".into()]));
        assert!(!filters.accepts_categories(&["kb".into()]));
        assert!(filters.accepts_categories(&[]));
        assert!(SearchFilters::default().accepts_categories(&["kb".into()]));
    }

    #[test]
    fn test_failed_health_record() {
        let h = HealthCheck::failed("wiki", SourceType::Http, "connection refused");
        assert!(!h.healthy);
        assert_eq!(h.response_time_ms, 0);
        assert_eq!(h.error_message.as_deref(), Some("connection refused"));
    }
}
