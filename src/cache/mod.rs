//! Content-aware cache shared by all sources.
//!
//! The [`CacheStore`] trait is the single async key/value interface placed
//! in front of search and document fetches. Keys are derived from the
//! content type, the owning source, and a canonical (sorted-key) JSON
//! rendering of the request parameters, so logically identical requests
//! always hit and two sources never collide.
//!
//! TTLs are chosen per [`ContentType`] at write time from a [`TtlPolicy`].
//! A miss is a normal outcome and is reported as `None`.

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

/// Semantic category of a cached value; drives its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Structured or synthesized runbooks for an alert.
    Runbooks,
    /// Free-text hits from a remote knowledge base.
    KnowledgeBase,
    /// Free-text hits from a locally indexed tree.
    SearchResults,
    Documents,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Runbooks => "runbooks",
            ContentType::KnowledgeBase => "knowledge_base",
            ContentType::SearchResults => "search_results",
            ContentType::Documents => "documents",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL in seconds per content type.
///
/// Structured runbooks churn least and live longest; free-text search hits
/// expire fastest.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TtlPolicy {
    #[serde(default = "default_runbooks_ttl")]
    pub runbooks: u64,
    #[serde(default = "default_knowledge_base_ttl")]
    pub knowledge_base: u64,
    #[serde(default = "default_search_results_ttl")]
    pub search_results: u64,
    #[serde(default = "default_documents_ttl")]
    pub documents: u64,
}

fn default_runbooks_ttl() -> u64 {
    3600
}
fn default_knowledge_base_ttl() -> u64 {
    900
}
fn default_search_results_ttl() -> u64 {
    300
}
fn default_documents_ttl() -> u64 {
    1800
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            runbooks: default_runbooks_ttl(),
            knowledge_base: default_knowledge_base_ttl(),
            search_results: default_search_results_ttl(),
            documents: default_documents_ttl(),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, content_type: ContentType) -> Duration {
        let secs = match content_type {
            ContentType::Runbooks => self.runbooks,
            ContentType::KnowledgeBase => self.knowledge_base,
            ContentType::SearchResults => self.search_results,
            ContentType::Documents => self.documents,
        };
        Duration::from_secs(secs)
    }
}

/// Deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    content_type: ContentType,
    source: String,
    digest: String,
}

impl CacheKey {
    /// Build a key from request parameters.
    ///
    /// Parameters are rendered as JSON with object keys sorted at every
    /// level before hashing, so field order never changes the key.
    pub fn new<P: Serialize + ?Sized>(content_type: ContentType, source: &str, params: &P) -> Self {
        let value = serde_json::to_value(params).unwrap_or(Value::Null);
        let mut hasher = Sha256::new();
        hasher.update(content_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(&value).as_bytes());
        Self {
            content_type,
            source: source.to_string(),
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.content_type, self.source, &self.digest[..16])
    }
}

/// Render JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// Async key/value cache with per-content-type TTLs.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheStore::get) | Read a live entry; expired entries are evicted and reported as misses |
/// | [`set`](CacheStore::set) | Write with the TTL of the key's content type |
/// | [`invalidate`](CacheStore::invalidate) | Drop one key |
/// | [`clear_by_type`](CacheStore::clear_by_type) | Drop every entry of one content type |
/// | [`clear_source`](CacheStore::clear_source) | Drop every entry owned by one source |
/// | [`warm_cache`](CacheStore::warm_cache) | Bulk preload |
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Value>;

    async fn set(&self, key: CacheKey, value: Value);

    /// Returns whether an entry was removed.
    async fn invalidate(&self, key: &CacheKey) -> bool;

    /// Returns the number of entries removed.
    async fn clear_by_type(&self, content_type: ContentType) -> usize;

    /// Returns the number of entries removed.
    async fn clear_source(&self, source: &str) -> usize;

    /// Returns the number of entries written.
    async fn warm_cache(&self, entries: Vec<(CacheKey, Value)>) -> usize;

    fn stats(&self) -> CacheStats;
}

/// Read and deserialize a cached value.
///
/// A value that no longer deserializes into `T` is invalidated and treated
/// as a miss.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &CacheKey) -> Option<T> {
    let value = cache.get(key).await?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "dropping undecodable cache entry");
            cache.invalidate(key).await;
            None
        }
    }
}

/// Serialize and store a value.
pub async fn put_json<T: Serialize + ?Sized>(cache: &dyn CacheStore, key: CacheKey, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => cache.set(key, v).await,
        Err(e) => tracing::debug!(key = %key, error = %e, "value not cacheable"),
    }
}

/// Store that never holds anything; used when `[cache] enabled = false`.
#[derive(Debug, Default)]
pub struct DisabledCache;

#[async_trait]
impl CacheStore for DisabledCache {
    async fn get(&self, _key: &CacheKey) -> Option<Value> {
        None
    }
    async fn set(&self, _key: CacheKey, _value: Value) {}
    async fn invalidate(&self, _key: &CacheKey) -> bool {
        false
    }
    async fn clear_by_type(&self, _content_type: ContentType) -> usize {
        0
    }
    async fn clear_source(&self, _source: &str) -> usize {
        0
    }
    async fn warm_cache(&self, _entries: Vec<(CacheKey, Value)>) -> usize {
        0
    }
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Build the shared store described by `[cache]`.
pub fn from_config(config: &CacheConfig) -> Arc<dyn CacheStore> {
    if config.enabled {
        Arc::new(MemoryCache::new(config.ttl_secs.clone(), config.max_entries))
    } else {
        Arc::new(DisabledCache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_stable_under_field_reordering() {
        let a: Value = serde_json::from_str(r#"{"query":"disk","filters":{"limit":5,"categories":["ops"]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"filters":{"categories":["ops"],"limit":5},"query":"disk"}"#).unwrap();
        assert_eq!(
            CacheKey::new(ContentType::SearchResults, "wiki", &a),
            CacheKey::new(ContentType::SearchResults, "wiki", &b)
        );
    }

    #[test]
    fn test_key_separates_sources_and_types() {
        let params = json!({ "query": "disk" });
        let base = CacheKey::new(ContentType::SearchResults, "wiki", &params);
        assert_ne!(base, CacheKey::new(ContentType::SearchResults, "docs", &params));
        assert_ne!(base, CacheKey::new(ContentType::Runbooks, "wiki", &params));
    }

    #[test]
    fn test_canonical_json_sorts_nested_objects() {
        let v = json!({ "b": 1, "a": { "d": [ { "z": 1, "y": 2 } ], "c": null } });
        assert_eq!(
            canonical_json(&v),
            r#"{"a":{"c":null,"d":[{"y":2,"z":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_runbooks_outlive_search_results() {
        let policy = TtlPolicy::default();
        assert!(
            policy.ttl_for(ContentType::Runbooks) > policy.ttl_for(ContentType::KnowledgeBase)
        );
        assert!(
            policy.ttl_for(ContentType::KnowledgeBase) > policy.ttl_for(ContentType::SearchResults)
        );
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = from_config(&config);
        let k = CacheKey::new(ContentType::Documents, "wiki", &json!({ "id": "a" }));
        cache.set(k.clone(), json!("body")).await;
        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
