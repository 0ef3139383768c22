//! Generic JSON documentation API source.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search | `GET {base}{search_path}?q=&limit=` |
//! | get_document | `GET {base}{document_path}/{id}` |
//! | search_runbooks | `GET {base}{runbook_path}?alert_type=&severity=` |
//! | health_check | `GET {base}{health_path}` |
//!
//! Document lists may be a bare array or an object with `results`,
//! `documents`, or `items`. Entries that fail to decode are skipped.
//!
//! # Status mapping
//!
//! - 401/403 → [`SourceError::Auth`]
//! - 404 → not found (`None` / empty)
//! - 429 → [`SourceError::RateLimited`] using `Retry-After`
//! - 5xx → [`SourceError::Upstream`] (counts against the breaker)
//!
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset` are fed to the rate
//! limiter on every response. Calls are never retried here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{get_json, put_json, CacheKey, CacheStore, ContentType};
use crate::config::{HttpSourceConfig, RetrievalConfig};
use crate::error::{QuotaKind, SourceError};
use crate::extract::searchable_content;
use crate::guard::SourceGuard;
use crate::models::{
    AlertContext, HealthCheck, SearchDocument, SearchFilters, SearchResult, SourceMetadata,
    SourceType,
};
use crate::rate_limit::{Metered, QuotaSnapshot};
use crate::runbook::{synthesize_runbook, Runbook};
use crate::search::{document_to_result, EngineParams, SearchEngine, SourceInfo};
use crate::traits::SourceAdapter;

const MAX_SYNTHESIZED: usize = 5;
/// Used when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
/// `X-RateLimit-Reset` values above this are epoch seconds, not deltas.
const EPOCH_RESET_CUTOFF: u64 = 1_000_000_000;

#[derive(Debug, Default)]
struct FetchStats {
    last_fetch: Option<DateTime<Utc>>,
    documents_seen: usize,
}

pub struct HttpSource {
    config: HttpSourceConfig,
    info: SourceInfo,
    params: EngineParams,
    base: Url,
    client: reqwest::Client,
    token: Option<String>,
    guard: SourceGuard,
    cache: Arc<dyn CacheStore>,
    stats: Mutex<FetchStats>,
}

impl HttpSource {
    pub fn new(
        config: HttpSourceConfig,
        retrieval: &RetrievalConfig,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url: {}", config.base_url))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()?;
        let token = match &config.token_env {
            Some(var) => match std::env::var(var) {
                Ok(t) if !t.is_empty() => Some(t),
                _ => {
                    tracing::warn!(source = %config.name, env = %var, "token env var not set; sending unauthenticated requests");
                    None
                }
            },
            None => None,
        };
        let guard = SourceGuard::new(
            &config.name,
            config.rate_limit_or_default(),
            config.breaker_or_default(),
            config.timeout(),
        );
        Ok(Self {
            info: SourceInfo {
                name: config.name.clone(),
                source_type: SourceType::Http,
                categories: config.categories.clone(),
            },
            params: retrieval.engine_params(config.confidence_threshold),
            base,
            client,
            token,
            guard,
            cache,
            stats: Mutex::new(FetchStats::default()),
            config,
        })
    }

    pub fn guard(&self) -> &SourceGuard {
        &self.guard
    }

    fn endpoint(&self, path: &str, segment: Option<&str>) -> Result<Url, SourceError> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url =
            Url::parse(&joined).map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        if let Some(seg) = segment {
            url.path_segments_mut()
                .map_err(|_| SourceError::InvalidResponse("base URL cannot hold a path".into()))?
                .push(seg);
        }
        Ok(url)
    }

    /// GET a JSON body through the guard. `Ok(None)` means 404.
    async fn fetch_json(&self, url: Url, query: &[(&str, String)]) -> Result<Option<Value>, SourceError> {
        let timeout = self.guard.timeout();
        self.guard
            .call(|| async move {
                let mut req = self.client.get(url).query(query);
                if let Some(token) = &self.token {
                    req = req.bearer_auth(token);
                }
                let resp = req.send().await.map_err(|e| map_transport_error(e, timeout))?;
                let quota = quota_snapshot(resp.headers());
                let status = resp.status().as_u16();
                match status {
                    200..=299 => {
                        let body: Value = resp
                            .json()
                            .await
                            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
                        Ok(Metered::with_quota(Some(body), quota))
                    }
                    404 => Ok(Metered::with_quota(None, quota)),
                    401 | 403 => Err(SourceError::Auth(format!("HTTP {}", status))),
                    429 => Err(SourceError::RateLimited {
                        kind: QuotaKind::Upstream,
                        retry_after: retry_after(resp.headers()).unwrap_or(DEFAULT_RETRY_AFTER),
                    }),
                    _ => {
                        let message = resp.text().await.unwrap_or_default();
                        Err(SourceError::Upstream {
                            status,
                            message: message.chars().take(200).collect(),
                        })
                    }
                }
            })
            .await
    }

    async fn fetch_documents(&self, query: &str) -> Result<Vec<SearchDocument>, SourceError> {
        let url = self.endpoint(&self.config.search_path, None)?;
        let params = [
            ("q", query.to_string()),
            ("limit", self.config.page_size.to_string()),
        ];
        let docs = match self.fetch_json(url, &params).await? {
            Some(body) => parse_documents(&body),
            None => Vec::new(),
        };
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.last_fetch = Some(Utc::now());
        stats.documents_seen = stats.documents_seen.max(docs.len());
        Ok(docs)
    }

    fn engine(&self, docs: Vec<SearchDocument>) -> SearchEngine {
        SearchEngine::new(self.info.clone(), docs, self.params.clone())
    }
}

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(timeout)
    } else {
        SourceError::Network(e.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Provider quota from `X-RateLimit-*` headers.
///
/// `X-RateLimit-Reset` is accepted either as seconds until reset or as an
/// epoch timestamp.
pub fn quota_snapshot(headers: &HeaderMap) -> Option<QuotaSnapshot> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset_in = header_u64(headers, "x-ratelimit-reset").map(|reset| {
        if reset > EPOCH_RESET_CUTOFF {
            let now = Utc::now().timestamp().max(0) as u64;
            Duration::from_secs(reset.saturating_sub(now))
        } else {
            Duration::from_secs(reset)
        }
    });
    Some(QuotaSnapshot {
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_in,
    })
}

pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(Duration::from_secs)
}

fn list_items(body: &Value) -> &[Value] {
    if let Some(items) = body.as_array() {
        return items;
    }
    ["results", "documents", "items", "runbooks"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_document(item: &Value) -> Option<SearchDocument> {
    let mut item = item.clone();
    // Numeric ids are common; the index keys on strings.
    if let Some(id) = item.get("id").and_then(Value::as_u64) {
        item["id"] = Value::String(id.to_string());
    }
    match serde_json::from_value::<SearchDocument>(item) {
        Ok(mut doc) => {
            if doc.searchable_content.is_empty() {
                doc.searchable_content = searchable_content(&doc.content);
            }
            if doc.title.is_empty() {
                doc.title = doc.id.clone();
            }
            Some(doc)
        }
        Err(e) => {
            tracing::debug!(error = %e, "skipping undecodable document");
            None
        }
    }
}

/// Decode a document list, skipping malformed entries.
pub fn parse_documents(body: &Value) -> Vec<SearchDocument> {
    list_items(body).iter().filter_map(parse_document).collect()
}

/// Decode a runbook list, skipping entries that fail validation.
pub fn parse_runbooks(body: &Value) -> Vec<Runbook> {
    list_items(body)
        .iter()
        .filter_map(|item| match Runbook::from_json(item) {
            Ok(rb) => Some(rb),
            Err(e) => {
                tracing::debug!(error = %e, "skipping invalid runbook");
                None
            }
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for HttpSource {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Http
    }

    fn categories(&self) -> &[String] {
        &self.info.categories
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError> {
        if query.trim().is_empty() || !filters.accepts_categories(&self.info.categories) {
            return Ok(Vec::new());
        }
        let key = CacheKey::new(
            ContentType::KnowledgeBase,
            &self.info.name,
            &json!({ "query": query, "filters": filters }),
        );
        if let Some(hit) = get_json::<Vec<SearchResult>>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        let docs = self.fetch_documents(query).await?;
        let results = self.engine(docs).search(query, filters).results;
        put_json(self.cache.as_ref(), key, &results).await;
        Ok(results)
    }

    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, SourceError> {
        let key = CacheKey::new(ContentType::Documents, &self.info.name, &json!({ "id": id }));
        if let Some(hit) = get_json::<SearchResult>(self.cache.as_ref(), &key).await {
            return Ok(Some(hit));
        }
        let url = self.endpoint(&self.config.document_path, Some(id))?;
        let Some(body) = self.fetch_json(url, &[]).await? else {
            return Ok(None);
        };
        let doc = parse_document(&body).ok_or_else(|| {
            SourceError::InvalidResponse(format!("document '{}' could not be decoded", id))
        })?;
        let result = document_to_result(&doc, &self.info, 1.0, vec!["Direct lookup".into()], 0);
        put_json(self.cache.as_ref(), key, &result).await;
        Ok(Some(result))
    }

    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        let key = CacheKey::new(ContentType::Runbooks, &self.info.name, alert);
        if let Some(hit) = get_json::<Vec<Runbook>>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        let url = self.endpoint(&self.config.runbook_path, None)?;
        let params = [
            ("alert_type", alert.alert_type.clone()),
            ("severity", alert.severity.clone()),
        ];
        let mut runbooks = match self.fetch_json(url, &params).await? {
            Some(body) => parse_runbooks(&body),
            None => Vec::new(),
        };

        if runbooks.is_empty() {
            let query = alert.alert_type.replace(['_', '-'], " ");
            let docs = self.fetch_documents(&query).await?;
            let engine = self.engine(docs);
            runbooks = engine
                .search(&query, &SearchFilters::default())
                .results
                .iter()
                .filter_map(|r| engine.find(&r.id))
                .filter_map(|doc| synthesize_runbook(doc, alert))
                .take(MAX_SYNTHESIZED)
                .collect();
        }
        put_json(self.cache.as_ref(), key, &runbooks).await;
        Ok(runbooks)
    }

    async fn health_check(&self) -> Result<HealthCheck, SourceError> {
        let started = std::time::Instant::now();
        let url = self.endpoint(&self.config.health_path, None)?;
        let body = self.fetch_json(url, &[]).await?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("base_url".into(), json!(self.config.base_url));
        metadata.insert("circuit_state".into(), json!(self.guard.circuit_state()));
        metadata.insert("rate_limit".into(), json!(self.guard.rate_limit_status()));

        Ok(HealthCheck {
            source_name: self.info.name.clone(),
            source_type: SourceType::Http,
            healthy: body.is_some(),
            response_time_ms: started.elapsed().as_millis() as u64,
            last_check: Utc::now(),
            error_message: body
                .is_none()
                .then(|| "health endpoint not found".to_string()),
            metadata,
        })
    }

    async fn refresh_index(&self, force: bool) -> Result<bool, SourceError> {
        // Nothing is indexed locally; a forced refresh drops cached answers.
        if !force {
            return Ok(false);
        }
        let removed = self.cache.clear_source(&self.info.name).await;
        tracing::info!(source = %self.info.name, removed, "dropped cached entries");
        Ok(true)
    }

    async fn get_metadata(&self) -> SourceMetadata {
        let (document_count, last_indexed) = {
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            (stats.documents_seen, stats.last_fetch)
        };
        SourceMetadata {
            name: self.info.name.clone(),
            source_type: SourceType::Http,
            document_count,
            categories: self.info.categories.clone(),
            last_indexed,
            avg_response_time_ms: self.guard.avg_response_time_ms(),
            success_rate: self.guard.breaker_stats().success_rate(),
            circuit_state: self.guard.circuit_state(),
            rate_limit: self.guard.rate_limit_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_quota_snapshot_headers() {
        let mut h = HeaderMap::new();
        assert!(quota_snapshot(&h).is_none());

        h.insert("X-RateLimit-Remaining", HeaderValue::from_static("42"));
        h.insert("X-RateLimit-Reset", HeaderValue::from_static("30"));
        let snap = quota_snapshot(&h).unwrap();
        assert_eq!(snap.remaining, 42);
        assert_eq!(snap.reset_in, Some(Duration::from_secs(30)));

        let epoch = (Utc::now().timestamp() + 120).to_string();
        h.insert("X-RateLimit-Reset", HeaderValue::from_str(&epoch).unwrap());
        let reset = quota_snapshot(&h).unwrap().reset_in.unwrap();
        assert!(reset <= Duration::from_secs(120) && reset >= Duration::from_secs(100));
    }

    #[test]
    fn test_retry_after_header() {
        let mut h = HeaderMap::new();
        h.insert("Retry-After", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_parse_documents_shapes_and_skips_bad_entries() {
        let wrapped = json!({ "results": [
            { "id": 7, "title": "DNS", "content": "flush the resolver cache" },
            { "title": "no id" },
            { "id": "b", "content": "restart the pod" }
        ]});
        let docs = parse_documents(&wrapped);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "7");
        assert_eq!(docs[1].title, "b");
        assert!(!docs[1].searchable_content.is_empty());

        let bare = json!([{ "id": "x" }]);
        assert_eq!(parse_documents(&bare).len(), 1);
        assert!(parse_documents(&json!({ "unexpected": true })).is_empty());
    }

    #[test]
    fn test_parse_runbooks_skips_invalid() {
        let body = json!([
            {
                "id": "ok", "title": "OK", "triggers": ["a"],
                "decision_tree": {}, "procedures": [{ "id": "1", "description": "do" }]
            },
            { "id": "bad", "title": "Bad", "triggers": ["a"], "procedures": [] }
        ]);
        let rbs = parse_runbooks(&body);
        assert_eq!(rbs.len(), 1);
        assert_eq!(rbs[0].id, "ok");
    }

    #[test]
    fn test_endpoint_joins_and_escapes() {
        let src = HttpSource::new(
            HttpSourceConfig::new("wiki", "http://localhost:1/api/"),
            &RetrievalConfig::default(),
            Arc::new(crate::cache::MemoryCache::default()),
        )
        .unwrap();
        assert_eq!(
            src.endpoint("/search", None).unwrap().as_str(),
            "http://localhost:1/api/search"
        );
        assert_eq!(
            src.endpoint("/documents", Some("a/b c")).unwrap().as_str(),
            "http://localhost:1/api/documents/a%2Fb%20c"
        );
    }
}
