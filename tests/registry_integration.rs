//! Integration tests for cross-source fan-out through [`SourceRegistry`].
//!
//! The sources here are in-test [`SourceAdapter`] implementations, which
//! also proves custom adapters plug into the registry unchanged.

use async_trait::async_trait;
use chrono::Utc;
use runbook_harness::circuit::CircuitState;
use runbook_harness::error::{RegistryError, SourceError};
use runbook_harness::models::{
    AlertContext, HealthCheck, SearchFilters, SearchResult, SourceMetadata, SourceType,
};
use runbook_harness::rate_limit::RateLimitStatus;
use runbook_harness::registry::SourceRegistry;
use runbook_harness::runbook::{DecisionTree, ProcedureStep, Runbook, RunbookMetadata};
use runbook_harness::traits::SourceAdapter;
use serde_json::Map;
use std::collections::BTreeMap;

// ─── Test Sources ───────────────────────────────────────────────────

/// Returns fixed results and runbooks.
struct StaticSource {
    name: String,
    scores: Vec<(String, f64)>,
    runbooks: Vec<Runbook>,
}

impl StaticSource {
    fn new(name: &str, scores: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            runbooks: Vec::new(),
        }
    }

    fn with_runbooks(mut self, runbooks: Vec<Runbook>) -> Self {
        self.runbooks = runbooks;
        self
    }

    fn result(&self, id: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: format!("{} doc {}", self.name, id),
            content: "body".to_string(),
            source: self.name.clone(),
            source_type: SourceType::Custom,
            confidence_score: score,
            match_reasons: vec!["fixed".to_string()],
            retrieval_time_ms: 1,
            url: None,
            last_updated: Utc::now().to_rfc3339(),
            metadata: Map::new(),
        }
    }
}

fn metadata(name: &str) -> SourceMetadata {
    SourceMetadata {
        name: name.to_string(),
        source_type: SourceType::Custom,
        document_count: 0,
        categories: Vec::new(),
        last_indexed: None,
        avg_response_time_ms: 0.0,
        success_rate: 1.0,
        circuit_state: CircuitState::Closed,
        rate_limit: RateLimitStatus::default(),
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Custom
    }

    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError> {
        Ok(self
            .scores
            .iter()
            .map(|(id, s)| self.result(id, *s))
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, SourceError> {
        Ok(self
            .scores
            .iter()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(doc_id, _)| self.result(doc_id, 1.0)))
    }

    async fn search_runbooks(&self, _alert: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        Ok(self.runbooks.clone())
    }

    async fn health_check(&self) -> Result<HealthCheck, SourceError> {
        Ok(HealthCheck {
            source_name: self.name.clone(),
            source_type: SourceType::Custom,
            healthy: true,
            response_time_ms: 2,
            last_check: Utc::now(),
            error_message: None,
            metadata: Map::new(),
        })
    }

    async fn refresh_index(&self, _force: bool) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn get_metadata(&self) -> SourceMetadata {
        metadata(&self.name)
    }
}

/// Fails every call with a network error.
struct FailingSource;

#[async_trait]
impl SourceAdapter for FailingSource {
    fn name(&self) -> &str {
        "broken"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Custom
    }

    async fn search(&self, _q: &str, _f: &SearchFilters) -> Result<Vec<SearchResult>, SourceError> {
        Err(SourceError::Network("connection refused".into()))
    }

    async fn get_document(&self, _id: &str) -> Result<Option<SearchResult>, SourceError> {
        Err(SourceError::Network("connection refused".into()))
    }

    async fn search_runbooks(&self, _a: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        Err(SourceError::Network("connection refused".into()))
    }

    async fn health_check(&self) -> Result<HealthCheck, SourceError> {
        Err(SourceError::Network("connection refused".into()))
    }

    async fn refresh_index(&self, _force: bool) -> Result<bool, SourceError> {
        Err(SourceError::Network("connection refused".into()))
    }

    async fn get_metadata(&self) -> SourceMetadata {
        metadata("broken")
    }
}

fn runbook(id: &str, title: &str, triggers: &[&str]) -> Runbook {
    Runbook {
        id: id.to_string(),
        title: title.to_string(),
        version: "1".to_string(),
        description: String::new(),
        triggers: triggers.iter().map(|t| t.to_string()).collect(),
        severity_mapping: BTreeMap::new(),
        decision_tree: DecisionTree {
            id: "dt".to_string(),
            name: String::new(),
            description: String::new(),
            branches: Vec::new(),
            default_action: "escalate".to_string(),
        },
        procedures: vec![ProcedureStep {
            id: "s1".to_string(),
            name: "step".to_string(),
            description: "Check the dashboard".to_string(),
            expected_outcome: String::new(),
            command: None,
            timeout_secs: None,
            prerequisites: Vec::new(),
        }],
        escalation_path: None,
        metadata: RunbookMetadata::default(),
    }
}

fn three_sources() -> SourceRegistry {
    let mut reg = SourceRegistry::new();
    reg.register(Box::new(FailingSource));
    reg.register(Box::new(StaticSource::new("wiki", &[("a", 0.9), ("b", 0.4)])));
    reg.register(Box::new(StaticSource::new("files", &[("c", 0.7)])));
    reg
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_source_does_not_abort_the_others() {
    let reg = three_sources();
    let results = reg
        .search("disk space", &SearchFilters::default())
        .await
        .unwrap();

    let scores: Vec<f64> = results.iter().map(|r| r.confidence_score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.4]);
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c", "b"]);
}

#[tokio::test]
async fn health_check_all_reports_failures_as_unhealthy() {
    let reg = three_sources();
    let health = reg.health_check_all().await;
    assert_eq!(health.len(), 3);

    let broken = health.iter().find(|h| h.source_name == "broken").unwrap();
    assert!(!broken.healthy);
    assert_eq!(broken.response_time_ms, 0);
    assert!(broken
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection refused"));

    assert!(health
        .iter()
        .filter(|h| h.source_name != "broken")
        .all(|h| h.healthy));
}

#[tokio::test]
async fn limit_truncates_merged_results() {
    let reg = three_sources();
    let filters = SearchFilters {
        limit: Some(2),
        ..Default::default()
    };
    let results = reg.search("disk", &filters).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].confidence_score, 0.7);
}

#[tokio::test]
async fn equal_scores_order_by_source_then_id() {
    let mut reg = SourceRegistry::new();
    reg.register(Box::new(StaticSource::new("zeta", &[("a", 0.5)])));
    reg.register(Box::new(StaticSource::new("alpha", &[("b", 0.5), ("a", 0.5)])));
    let results = reg.search("x", &SearchFilters::default()).await.unwrap();
    let keys: Vec<(String, String)> = results
        .iter()
        .map(|r| (r.source.clone(), r.id.clone()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("alpha".to_string(), "a".to_string()),
            ("alpha".to_string(), "b".to_string()),
            ("zeta".to_string(), "a".to_string()),
        ]
    );
}

#[tokio::test]
async fn all_sources_failing_is_an_error() {
    let mut reg = SourceRegistry::new();
    reg.register(Box::new(FailingSource));
    match reg.search("disk", &SearchFilters::default()).await {
        Err(RegistryError::AllSourcesFailed { count, last }) => {
            assert_eq!(count, 1);
            assert!(matches!(last, SourceError::Network(_)));
        }
        other => panic!("expected AllSourcesFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn blank_query_is_empty_without_contacting_sources() {
    let mut reg = SourceRegistry::new();
    reg.register(Box::new(FailingSource));
    assert!(reg.search("  ", &SearchFilters::default()).await.unwrap().is_empty());

    let bad = SearchFilters {
        confidence_threshold: Some(1.5),
        ..Default::default()
    };
    assert!(matches!(
        reg.search("", &bad).await,
        Err(RegistryError::Invalid(_))
    ));
}

#[tokio::test]
async fn runbooks_are_deduplicated_and_ranked() {
    let mut reg = SourceRegistry::new();
    reg.register(Box::new(FailingSource));
    reg.register(Box::new(StaticSource::new("wiki", &[]).with_runbooks(vec![
        runbook("rb-generic", "General triage", &["any"]),
        runbook("rb-mem", "high_memory_usage response", &["high_memory_usage"]),
        runbook("rb-mem", "high_memory_usage response", &["high_memory_usage"]),
    ])));
    reg.register(Box::new(StaticSource::new("files", &[]).with_runbooks(vec![runbook(
        "rb-mem",
        "Memory triage",
        &["high_memory_usage"],
    )])));

    let alert = AlertContext::new("high_memory_usage", "critical");
    let ranked = reg.search_runbooks(&alert).await.unwrap();

    let keys: Vec<(&str, &str)> = ranked
        .iter()
        .map(|r| (r.source.as_str(), r.runbook.id.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![("wiki", "rb-mem"), ("files", "rb-mem"), ("wiki", "rb-generic")]
    );
    assert!(ranked[0].relevance > ranked[1].relevance);
    assert!(ranked.iter().all(|r| (0.0..=1.0).contains(&r.relevance)));
}

#[tokio::test]
async fn get_document_routes_to_named_source() {
    let reg = three_sources();
    let doc = reg.get_document("files", "c").await.unwrap().unwrap();
    assert_eq!(doc.source, "files");
    assert!(reg.get_document("files", "zzz").await.unwrap().is_none());
    assert!(matches!(
        reg.get_document("broken", "c").await,
        Err(RegistryError::Source(SourceError::Network(_)))
    ));
}

#[tokio::test]
async fn refresh_and_metadata_cover_every_source() {
    let reg = three_sources();
    let refreshed = reg.refresh_all(true).await;
    assert_eq!(refreshed.len(), 3);
    assert!(refreshed
        .iter()
        .any(|(name, outcome)| name == "broken" && outcome.is_err()));
    assert_eq!(reg.metadata_all().await.len(), 3);
}
