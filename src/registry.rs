//! Source registry: the cross-source aggregator.
//!
//! Holds every configured [`SourceAdapter`] as a trait object and fans each
//! request out to all of them concurrently. Calls are settled with
//! [`join_all`], so a slow or failing source never cancels its siblings; a
//! failure is logged and its contribution dropped.
//!
//! ```text
//! search(query, filters)
//!   ├─ validate filters              → RegistryError::Invalid
//!   ├─ join_all(source.search)       (settle every source)
//!   ├─ drop + warn on failures       → AllSourcesFailed if none succeeded
//!   └─ merge, sort by confidence, truncate
//! ```

use anyhow::Result;
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::config::{Config, SourceConfig};
use crate::error::{RegistryError, SourceError};
use crate::models::{
    AlertContext, HealthCheck, SearchFilters, SearchResult, SourceMetadata,
};
use crate::runbook::{runbook_relevance, RankedRunbook};
use crate::source_fs::FilesystemSource;
use crate::source_http::HttpSource;
use crate::traits::SourceAdapter;

const DEFAULT_FINAL_LIMIT: usize = 10;

/// Registry of documentation sources.
pub struct SourceRegistry {
    sources: Vec<Box<dyn SourceAdapter>>,
    final_limit: usize,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            final_limit: DEFAULT_FINAL_LIMIT,
        }
    }

    /// Build one source per `[[sources]]` entry.
    pub fn from_config(config: &Config, cache: Arc<dyn CacheStore>) -> Result<Self> {
        let mut registry = Self::new().with_final_limit(config.retrieval.final_limit);
        for source in &config.sources {
            match source {
                SourceConfig::Filesystem(fs) => {
                    registry.register(Box::new(FilesystemSource::new(
                        fs.clone(),
                        &config.retrieval,
                        cache.clone(),
                    )?));
                }
                SourceConfig::Http(http) => {
                    registry.register(Box::new(HttpSource::new(
                        http.clone(),
                        &config.retrieval,
                        cache.clone(),
                    )?));
                }
            }
        }
        Ok(registry)
    }

    /// Cap applied when a request carries no `limit`.
    pub fn with_final_limit(mut self, limit: usize) -> Self {
        self.final_limit = limit.max(1);
        self
    }

    pub fn register(&mut self, source: Box<dyn SourceAdapter>) {
        self.sources.push(source);
    }

    pub fn find(&self, name: &str) -> Option<&dyn SourceAdapter> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn sources(&self) -> &[Box<dyn SourceAdapter>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Search every source and merge the results.
    ///
    /// Fails only on a malformed request or when every source failed.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, RegistryError> {
        filters.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let outcomes = join_all(self.sources.iter().map(|s| s.search(query, filters))).await;

        let mut merged = self.settle("search", outcomes)?;
        merged.sort_by(compare_results);
        merged.truncate(filters.limit.unwrap_or(self.final_limit));
        Ok(merged)
    }

    /// Health of every source. A failed check becomes an unhealthy record.
    pub async fn health_check_all(&self) -> Vec<HealthCheck> {
        let outcomes = join_all(self.sources.iter().map(|s| s.health_check())).await;
        self.sources
            .iter()
            .zip(outcomes)
            .map(|(source, outcome)| match outcome {
                Ok(check) => check,
                Err(e) => {
                    tracing::warn!(source = %source.name(), error = %e, "health check failed");
                    HealthCheck::failed(source.name(), source.source_type(), e.to_string())
                }
            })
            .collect()
    }

    /// Runbooks for an alert from every source, deduplicated and ranked by
    /// relevance to the alert.
    pub async fn search_runbooks(
        &self,
        alert: &AlertContext,
    ) -> Result<Vec<RankedRunbook>, RegistryError> {
        alert.validate()?;
        let outcomes = join_all(self.sources.iter().map(|s| s.search_runbooks(alert))).await;
        let tagged = self
            .sources
            .iter()
            .zip(outcomes)
            .map(|(source, outcome)| {
                outcome.map(|runbooks| {
                    runbooks
                        .into_iter()
                        .map(|runbook| RankedRunbook {
                            source: source.name().to_string(),
                            relevance: runbook_relevance(&runbook, alert),
                            runbook,
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut ranked: Vec<RankedRunbook> = self
            .settle("search_runbooks", tagged)?
            .into_iter()
            .filter(|r| seen.insert((r.source.clone(), r.runbook.id.clone())))
            .collect();
        ranked.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.runbook
                        .metadata
                        .confidence_score
                        .partial_cmp(&a.runbook.metadata.confidence_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.runbook.id.cmp(&b.runbook.id))
        });
        ranked.truncate(self.final_limit);
        Ok(ranked)
    }

    /// Direct lookup in one named source.
    pub async fn get_document(
        &self,
        source: &str,
        id: &str,
    ) -> Result<Option<SearchResult>, RegistryError> {
        let adapter = self
            .find(source)
            .ok_or_else(|| RegistryError::UnknownSource(source.to_string()))?;
        Ok(adapter.get_document(id).await?)
    }

    /// Refresh every source; returns `(name, outcome)` per source.
    pub async fn refresh_all(&self, force: bool) -> Vec<(String, Result<bool, SourceError>)> {
        let outcomes = join_all(self.sources.iter().map(|s| s.refresh_index(force))).await;
        self.sources
            .iter()
            .map(|s| s.name().to_string())
            .zip(outcomes)
            .collect()
    }

    pub async fn metadata_all(&self) -> Vec<SourceMetadata> {
        join_all(self.sources.iter().map(|s| s.get_metadata())).await
    }

    /// Keep successful outcomes, logging each failure.
    fn settle<T>(
        &self,
        op: &str,
        outcomes: Vec<Result<Vec<T>, SourceError>>,
    ) -> Result<Vec<T>, RegistryError> {
        let total = outcomes.len();
        let mut failed = 0;
        let mut last_error = None;
        let mut merged = Vec::new();
        for (source, outcome) in self.sources.iter().zip(outcomes) {
            match outcome {
                Ok(items) => merged.extend(items),
                Err(e) => {
                    tracing::warn!(source = %source.name(), op, error = %e, "source failed");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(last) if failed == total => Err(RegistryError::AllSourcesFailed {
                count: total,
                last,
            }),
            _ => Ok(merged),
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Confidence descending, then `(source, id)` for a stable order.
fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.confidence_score
        .partial_cmp(&a.confidence_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_empty_registry() {
        let reg = SourceRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.find("anything").is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_search_is_ok() {
        let reg = SourceRegistry::default();
        let results = reg.search("disk", &SearchFilters::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filters_rejected_before_fan_out() {
        let reg = SourceRegistry::new();
        let filters = SearchFilters {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            reg.search("disk", &filters).await,
            Err(RegistryError::Invalid(_))
        ));
        assert!(matches!(
            reg.search_runbooks(&AlertContext::new("  ", "high")).await,
            Err(RegistryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_source_lookup() {
        let reg = SourceRegistry::new();
        assert!(matches!(
            reg.get_document("nope", "a").await,
            Err(RegistryError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_from_config_builds_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[retrieval]
final_limit = 4

[[sources]]
type = "filesystem"
name = "local"
root = "{}"

[[sources]]
type = "http"
name = "wiki"
base_url = "http://127.0.0.1:9"
"#,
            dir.path().display()
        );
        let config = parse_config(&toml).unwrap();
        let reg = SourceRegistry::from_config(&config, crate::cache::from_config(&config.cache))
            .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.final_limit, 4);
        assert_eq!(
            reg.find("local").map(|s| s.source_type()),
            Some(crate::models::SourceType::Filesystem)
        );
        assert_eq!(
            reg.find("wiki").map(|s| s.source_type()),
            Some(crate::models::SourceType::Http)
        );
    }
}
