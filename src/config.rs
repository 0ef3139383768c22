use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::circuit::BreakerConfig;
use crate::rate_limit::RateLimitConfig;
use crate::search::EngineParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Below this many hits a stage escalates to the next one.
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_max_variations")]
    pub max_variations: usize,
    #[serde(default = "default_variation_penalty")]
    pub variation_penalty: f64,
    #[serde(default = "default_exact_match_confidence")]
    pub exact_match_confidence: f64,
}

fn default_final_limit() -> usize {
    10
}
fn default_min_candidates() -> usize {
    3
}
fn default_fuzzy_threshold() -> f64 {
    0.5
}
fn default_max_variations() -> usize {
    10
}
fn default_variation_penalty() -> f64 {
    0.15
}
fn default_exact_match_confidence() -> f64 {
    0.7
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
            min_candidates: default_min_candidates(),
            fuzzy_threshold: default_fuzzy_threshold(),
            max_variations: default_max_variations(),
            variation_penalty: default_variation_penalty(),
            exact_match_confidence: default_exact_match_confidence(),
        }
    }
}

impl RetrievalConfig {
    /// Engine tunables for a source with the given default threshold.
    pub fn engine_params(&self, default_confidence_threshold: f64) -> EngineParams {
        EngineParams {
            final_limit: self.final_limit,
            min_candidates: self.min_candidates,
            fuzzy_threshold: self.fuzzy_threshold,
            max_variations: self.max_variations,
            variation_penalty: self.variation_penalty,
            exact_match_confidence: self.exact_match_confidence,
            default_confidence_threshold,
            ..EngineParams::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub ttl_secs: TtlPolicy,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_max_entries(),
            ttl_secs: TtlPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// One `[[sources]]` entry, selected by its `type` tag.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Filesystem(FilesystemSourceConfig),
    Http(HttpSourceConfig),
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Filesystem(c) => &c.name,
            SourceConfig::Http(c) => &c.name,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        match self {
            SourceConfig::Filesystem(c) => c.confidence_threshold,
            SourceConfig::Http(c) => c.confidence_threshold,
        }
    }

    pub fn categories(&self) -> &[String] {
        match self {
            SourceConfig::Filesystem(c) => &c.categories,
            SourceConfig::Http(c) => &c.categories,
        }
    }

    fn rate_limit(&self) -> Option<&RateLimitConfig> {
        match self {
            SourceConfig::Filesystem(c) => c.rate_limit.as_ref(),
            SourceConfig::Http(c) => c.rate_limit.as_ref(),
        }
    }

    fn circuit_breaker(&self) -> Option<&BreakerConfig> {
        match self {
            SourceConfig::Filesystem(c) => c.circuit_breaker.as_ref(),
            SourceConfig::Http(c) => c.circuit_breaker.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_fs_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_fs_timeout_secs")]
    pub timeout_secs: u64,
    /// Unmetered when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// [`BreakerConfig::internal`] when absent.
    #[serde(default)]
    pub circuit_breaker: Option<BreakerConfig>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.json".to_string(),
    ]
}
fn default_fs_threshold() -> f64 {
    0.4
}
fn default_fs_timeout_secs() -> u64 {
    5
}

impl FilesystemSourceConfig {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            categories: Vec::new(),
            confidence_threshold: default_fs_threshold(),
            timeout_secs: default_fs_timeout_secs(),
            rate_limit: None,
            circuit_breaker: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_or_default(&self) -> RateLimitConfig {
        self.rate_limit
            .clone()
            .unwrap_or_else(RateLimitConfig::unmetered)
    }

    pub fn breaker_or_default(&self) -> BreakerConfig {
        self.circuit_breaker
            .clone()
            .unwrap_or_else(BreakerConfig::internal)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSourceConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
    #[serde(default = "default_document_path")]
    pub document_path: String,
    #[serde(default = "default_runbook_path")]
    pub runbook_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Documents requested per upstream search.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_http_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// [`BreakerConfig::external`] when absent.
    #[serde(default)]
    pub circuit_breaker: Option<BreakerConfig>,
}

fn default_search_path() -> String {
    "/search".to_string()
}
fn default_document_path() -> String {
    "/documents".to_string()
}
fn default_runbook_path() -> String {
    "/runbooks".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_page_size() -> usize {
    50
}
fn default_http_threshold() -> f64 {
    0.5
}
fn default_http_timeout_secs() -> u64 {
    10
}

impl HttpSourceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            search_path: default_search_path(),
            document_path: default_document_path(),
            runbook_path: default_runbook_path(),
            health_path: default_health_path(),
            token_env: None,
            page_size: default_page_size(),
            categories: Vec::new(),
            confidence_threshold: default_http_threshold(),
            timeout_secs: default_http_timeout_secs(),
            rate_limit: None,
            circuit_breaker: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_or_default(&self) -> RateLimitConfig {
        self.rate_limit.clone().unwrap_or_default()
    }

    pub fn breaker_or_default(&self) -> BreakerConfig {
        self.circuit_breaker
            .clone()
            .unwrap_or_else(BreakerConfig::external)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    for (key, value) in [
        ("retrieval.fuzzy_threshold", r.fuzzy_threshold),
        ("retrieval.variation_penalty", r.variation_penalty),
        ("retrieval.exact_match_confidence", r.exact_match_confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", key);
        }
    }
    if config.cache.max_entries == 0 {
        bail!("cache.max_entries must be > 0");
    }

    let mut names = HashSet::new();
    for source in &config.sources {
        let name = source.name();
        if name.trim().is_empty() {
            bail!("sources: every source needs a non-empty name");
        }
        if !names.insert(name.to_string()) {
            bail!("sources: duplicate source name '{}'", name);
        }
        if !(0.0..=1.0).contains(&source.confidence_threshold()) {
            bail!(
                "sources.{}: confidence_threshold must be in [0.0, 1.0]",
                name
            );
        }
        if let Some(rl) = source.rate_limit() {
            if !(rl.self_quota_fraction > 0.0 && rl.self_quota_fraction <= 1.0) {
                bail!(
                    "sources.{}: rate_limit.self_quota_fraction must be in (0.0, 1.0]",
                    name
                );
            }
            if rl.requests_per_hour == 0 {
                bail!("sources.{}: rate_limit.requests_per_hour must be > 0", name);
            }
        }
        if let Some(cb) = source.circuit_breaker() {
            if cb.failure_threshold == 0 || cb.success_threshold == 0 {
                bail!("sources.{}: circuit_breaker thresholds must be > 0", name);
            }
        }
        match source {
            SourceConfig::Filesystem(c) => {
                if c.timeout_secs == 0 {
                    bail!("sources.{}: timeout_secs must be > 0", name);
                }
            }
            SourceConfig::Http(c) => {
                if c.timeout_secs == 0 {
                    bail!("sources.{}: timeout_secs must be > 0", name);
                }
                reqwest::Url::parse(&c.base_url).with_context(|| {
                    format!("sources.{}: invalid base_url '{}'", name, c.base_url)
                })?;
            }
        }
    }
    Ok(())
}
