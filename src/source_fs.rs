//! Local directory tree source.
//!
//! Walks `root` with `walkdir`, filters paths through include/exclude
//! globsets, and extracts every matching file into the fuzzy index. JSON
//! files that validate as runbooks are served as structured runbooks;
//! markdown and text documents are synthesized into runbooks on demand.
//!
//! The index is built lazily on first use and rebuilt by
//! [`refresh_index`](SourceAdapter::refresh_index). A rebuild drops this
//! source's cache entries.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::cache::{get_json, put_json, CacheKey, CacheStore, ContentType};
use crate::config::{FilesystemSourceConfig, RetrievalConfig};
use crate::error::SourceError;
use crate::extract::{extract_file, Extracted};
use crate::guard::SourceGuard;
use crate::models::{
    AlertContext, HealthCheck, SearchDocument, SearchFilters, SearchResult, SourceMetadata,
    SourceType,
};
use crate::rate_limit::Metered;
use crate::runbook::{runbook_relevance, synthesize_runbook, Runbook};
use crate::search::{document_to_result, EngineParams, SearchEngine, SourceInfo};
use crate::traits::SourceAdapter;

/// Upper bound on runbooks synthesized per alert.
const MAX_SYNTHESIZED: usize = 5;

struct FsIndex {
    engine: SearchEngine,
    runbooks: Vec<Runbook>,
    indexed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ScanOutput {
    documents: Vec<SearchDocument>,
    runbooks: Vec<Runbook>,
    skipped: usize,
}

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    info: SourceInfo,
    params: EngineParams,
    include: GlobSet,
    exclude: GlobSet,
    guard: SourceGuard,
    cache: Arc<dyn CacheStore>,
    index: RwLock<Option<FsIndex>>,
}

impl FilesystemSource {
    pub fn new(
        config: FilesystemSourceConfig,
        retrieval: &RetrievalConfig,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        let guard = SourceGuard::new(
            &config.name,
            config.rate_limit_or_default(),
            config.breaker_or_default(),
            config.timeout(),
        );
        Ok(Self {
            info: SourceInfo {
                name: config.name.clone(),
                source_type: SourceType::Filesystem,
                categories: config.categories.clone(),
            },
            params: retrieval.engine_params(config.confidence_threshold),
            include,
            exclude,
            guard,
            cache,
            index: RwLock::new(None),
            config,
        })
    }

    pub fn guard(&self) -> &SourceGuard {
        &self.guard
    }

    /// Build the index if missing, or unconditionally when `force` is set.
    async fn load_index(&self, force: bool) -> Result<bool, SourceError> {
        if !force && self.index.read().await.is_some() {
            return Ok(false);
        }
        let mut slot = self.index.write().await;
        if slot.is_some() && !force {
            return Ok(false);
        }

        let root = self.config.root.clone();
        let include = self.include.clone();
        let exclude = self.exclude.clone();
        let follow = self.config.follow_symlinks;
        let scanned = self
            .guard
            .call(|| async move {
                let out = tokio::task::spawn_blocking(move || {
                    scan_tree(&root, &include, &exclude, follow)
                })
                .await
                .map_err(|e| SourceError::Io(e.to_string()))??;
                Ok(Metered::plain(out))
            })
            .await?;

        tracing::info!(
            source = %self.info.name,
            documents = scanned.documents.len(),
            runbooks = scanned.runbooks.len(),
            skipped = scanned.skipped,
            "indexed filesystem source"
        );
        *slot = Some(FsIndex {
            engine: SearchEngine::new(self.info.clone(), scanned.documents, self.params.clone()),
            runbooks: scanned.runbooks,
            indexed_at: Utc::now(),
        });
        drop(slot);
        self.cache.clear_source(&self.info.name).await;
        Ok(true)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn scan_tree(
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    follow_symlinks: bool,
) -> Result<ScanOutput, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Io(format!(
            "root is not a directory: {}",
            root.display()
        )));
    }

    let mut out = ScanOutput::default();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                out.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let body = match std::fs::read_to_string(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(path = %rel_str, error = %e, "skipping unreadable file");
                out.skipped += 1;
                continue;
            }
        };
        let modified: DateTime<Utc> = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::from)
            .unwrap_or_else(Utc::now);
        let url = Some(format!("file://{}", path.display()));

        match extract_file(&rel_str, &body, modified, url) {
            Ok(Extracted::Document(doc)) => out.documents.push(doc),
            Ok(Extracted::Runbook(rb, doc)) => {
                out.runbooks.push(*rb);
                out.documents.push(doc);
            }
            Err(e) => {
                tracing::debug!(path = %rel_str, error = %e, "skipping document");
                out.skipped += 1;
            }
        }
    }
    out.documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(out)
}

#[async_trait]
impl SourceAdapter for FilesystemSource {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Filesystem
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
            ContentType::SearchResults,
            &self.info.name,
            &json!({ "query": query, "filters": filters }),
        );
        if let Some(hit) = get_json::<Vec<SearchResult>>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        self.load_index(false).await?;
        let results = {
            let index = self.index.read().await;
            match index.as_ref() {
                Some(ix) => ix.engine.search(query, filters).results,
                None => Vec::new(),
            }
        };
        put_json(self.cache.as_ref(), key, &results).await;
        Ok(results)
    }

    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, SourceError> {
        let key = CacheKey::new(ContentType::Documents, &self.info.name, &json!({ "id": id }));
        if let Some(hit) = get_json::<SearchResult>(self.cache.as_ref(), &key).await {
            return Ok(Some(hit));
        }
        self.load_index(false).await?;
        let found = {
            let index = self.index.read().await;
            index.as_ref().and_then(|ix| {
                ix.engine.find(id).map(|doc| {
                    document_to_result(doc, &self.info, 1.0, vec!["Direct lookup".into()], 0)
                })
            })
        };
        if let Some(result) = &found {
            put_json(self.cache.as_ref(), key, result).await;
        }
        Ok(found)
    }

    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        let key = CacheKey::new(ContentType::Runbooks, &self.info.name, alert);
        if let Some(hit) = get_json::<Vec<Runbook>>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        self.load_index(false).await?;

        let runbooks = {
            let index = self.index.read().await;
            let Some(ix) = index.as_ref() else {
                return Ok(Vec::new());
            };
            let mut found: Vec<Runbook> = ix
                .runbooks
                .iter()
                .filter(|rb| runbook_relevance(rb, alert) > 0.0)
                .cloned()
                .collect();

            let query = alert.alert_type.replace(['_', '-'], " ");
            let synthesized = ix
                .engine
                .search(&query, &SearchFilters::default())
                .results
                .into_iter()
                .filter_map(|r| ix.engine.find(&r.id))
                // Structured runbooks are already judged above.
                .filter(|doc| !doc.metadata.contains_key("runbook_id"))
                .filter_map(|doc| synthesize_runbook(doc, alert))
                .take(MAX_SYNTHESIZED)
                .collect::<Vec<_>>();
            found.extend(synthesized);
            found
        };
        put_json(self.cache.as_ref(), key, &runbooks).await;
        Ok(runbooks)
    }

    async fn health_check(&self) -> Result<HealthCheck, SourceError> {
        let started = std::time::Instant::now();
        let root: PathBuf = self.config.root.clone();
        let is_dir = self
            .guard
            .call(|| async move {
                let md = tokio::fs::metadata(&root).await?;
                Ok(Metered::plain(md.is_dir()))
            })
            .await?;

        let document_count = {
            let index = self.index.read().await;
            index.as_ref().map(|ix| ix.engine.len()).unwrap_or(0)
        };
        let mut metadata = serde_json::Map::new();
        metadata.insert("root".into(), json!(self.config.root.display().to_string()));
        metadata.insert("document_count".into(), json!(document_count));
        metadata.insert("circuit_state".into(), json!(self.guard.circuit_state()));

        Ok(HealthCheck {
            source_name: self.info.name.clone(),
            source_type: SourceType::Filesystem,
            healthy: is_dir,
            response_time_ms: started.elapsed().as_millis() as u64,
            last_check: Utc::now(),
            error_message: (!is_dir).then(|| "root is not a directory".to_string()),
            metadata,
        })
    }

    async fn refresh_index(&self, force: bool) -> Result<bool, SourceError> {
        self.load_index(force).await
    }

    async fn get_metadata(&self) -> SourceMetadata {
        let (document_count, last_indexed) = {
            let index = self.index.read().await;
            index
                .as_ref()
                .map(|ix| (ix.engine.len(), Some(ix.indexed_at)))
                .unwrap_or((0, None))
        };
        SourceMetadata {
            name: self.info.name.clone(),
            source_type: SourceType::Filesystem,
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
