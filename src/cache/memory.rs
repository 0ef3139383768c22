//! In-memory [`CacheStore`] backed by `moka`.
//!
//! Capacity is bounded by moka's TinyLFU admission and eviction, and each
//! entry's lifetime comes from its key's [`ContentType`] through an
//! [`Expiry`] policy. Entries also carry a deadline on the tokio clock,
//! checked on read, so expiry agrees with the limiter and breaker clocks
//! (and with a paused test runtime).

use async_trait::async_trait;
use moka::sync::Cache;
use moka::Expiry;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheKey, CacheStats, CacheStore, ContentType, TtlPolicy};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Per-entry TTL chosen by content type.
struct ContentTypeExpiry {
    policy: TtlPolicy,
}

impl Expiry<CacheKey, CacheEntry> for ContentTypeExpiry {
    fn expire_after_create(
        &self,
        key: &CacheKey,
        _value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(self.policy.ttl_for(key.content_type()))
    }

    fn expire_after_update(
        &self,
        key: &CacheKey,
        _value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.policy.ttl_for(key.content_type()))
    }
}

/// Process-local cache for all sources.
pub struct MemoryCache {
    entries: Cache<CacheKey, CacheEntry>,
    policy: TtlPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new(policy: TtlPolicy, max_entries: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries.max(1) as u64)
            .expire_after(ContentTypeExpiry {
                policy: policy.clone(),
            })
            .build();
        Self {
            entries,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Live entry count, after applying pending evictions.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, _)| (*k).clone())
            .collect();
        keys.iter()
            .filter(|k| self.entries.remove(*k).is_some())
            .count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(TtlPolicy::default(), 10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Some(_) => {
                self.entries.invalidate(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: CacheKey, value: Value) {
        let expires_at = Instant::now() + self.policy.ttl_for(key.content_type());
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    async fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn clear_by_type(&self, content_type: ContentType) -> usize {
        let removed = self.remove_where(|k| k.content_type() == content_type);
        tracing::debug!(content_type = %content_type, removed, "cleared cache by type");
        removed
    }

    async fn clear_source(&self, source: &str) -> usize {
        self.remove_where(|k| k.source() == source)
    }

    async fn warm_cache(&self, entries: Vec<(CacheKey, Value)>) -> usize {
        let count = entries.len();
        for (key, value) in entries {
            self.set(key, value).await;
        }
        count
    }

    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
