//! Three-stage search engine over one source's documents.
//!
//! # Pipeline
//!
//! ```text
//! query ──▶ category early exit
//!       ──▶ stage 1: fuzzy match on the query
//!       ──▶ stage 2: fuzzy match on query variations   (only if < min_candidates)
//!       ──▶ stage 3: case-insensitive substring scan    (adds literal hits the fuzzy stages missed)
//!       ──▶ confidence scoring ──▶ threshold ──▶ sort ──▶ truncate
//! ```
//!
//! A document is scored once, by the first stage that found it. Variation
//! matches carry a fixed penalty, so a literal match always outranks a
//! synonym match of equal distance. The substring stage guarantees that a
//! query appearing verbatim in a document is never lost, however many
//! fuzzy hits other documents produced. It is reported in
//! [`SearchOutcome::stages`] when the fuzzy stages came up short or when it
//! recovered at least one document.
//!
//! # Ordering
//!
//! Results are sorted by:
//! 1. `confidence_score` descending
//! 2. `last_updated` descending (fresher first)
//! 3. `id` ascending (deterministic)

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::confidence::{self, MatchStage, ScoringInput};
use crate::fuzzy::{tokenize, FieldWeights, FuzzyIndex};
use crate::models::{format_iso, SearchDocument, SearchFilters, SearchResult, SourceType};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "how", "what", "when", "why", "from", "into", "onto", "our",
    "are", "is", "to", "of", "in", "on", "at", "an", "a", "do", "does", "my", "fix", "about",
];

/// Domain synonyms, consulted in order.
const SYNONYMS: &TermTable = &[
    ("disk", &["storage", "volume"]),
    ("storage", &["disk", "volume"]),
    ("space", &["capacity"]),
    ("capacity", &["space"]),
    ("memory", &["heap", "ram", "oom"]),
    ("heap", &["memory"]),
    ("oom", &["memory"]),
    ("cpu", &["processor", "load"]),
    ("network", &["connectivity", "dns"]),
    ("database", &["db", "postgres", "mysql"]),
    ("db", &["database"]),
    ("error", &["failure", "exception"]),
    ("failure", &["error", "outage"]),
    ("outage", &["incident", "downtime"]),
    ("restart", &["reboot", "bounce"]),
    ("slow", &["latency", "performance"]),
    ("latency", &["slow", "performance"]),
    ("certificate", &["tls", "ssl", "cert"]),
    ("cert", &["certificate", "tls"]),
    ("alert", &["alarm", "page"]),
];

/// Operational context terms added for generic ops vocabulary.
const OPS_CONTEXT: &TermTable = &[
    ("runbook", &["ops", "incident", "procedure"]),
    ("troubleshoot", &["debug", "diagnose", "runbook"]),
    ("incident", &["outage", "runbook", "postmortem"]),
    ("playbook", &["runbook", "procedure"]),
];

type TermTable = [(&'static str, &'static [&'static str])];

fn lookup(table: &'static TermTable, token: &str) -> &'static [&'static str] {
    table
        .iter()
        .find(|(k, _)| *k == token)
        .map(|(_, v)| *v)
        .unwrap_or(&[])
}

/// Derived queries for stage 2, most specific first, at most `max` entries.
///
/// Order: full synonym substitution, single-token substitutions,
/// individual significant tokens, bare synonyms, operational context terms.
pub fn query_variations(query: &str, max: usize) -> Vec<String> {
    let tokens = tokenize(query);
    if tokens.is_empty() || max == 0 {
        return Vec::new();
    }
    let original = tokens.join(" ");
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::from([original]);
    let mut push = |v: String, out: &mut Vec<String>| {
        if !v.is_empty() && seen.insert(v.clone()) {
            out.push(v);
        }
    };

    let full: Vec<&str> = tokens
        .iter()
        .map(|t| lookup(SYNONYMS, t).first().copied().unwrap_or(t.as_str()))
        .collect();
    push(full.join(" "), &mut out);

    if tokens.len() > 1 {
        for (i, t) in tokens.iter().enumerate() {
            for syn in lookup(SYNONYMS, t) {
                let mut replaced: Vec<&str> = tokens.iter().map(String::as_str).collect();
                replaced[i] = *syn;
                push(replaced.join(" "), &mut out);
            }
        }
        for t in &tokens {
            if t.len() >= 3 && !STOPWORDS.contains(&t.as_str()) {
                push(t.clone(), &mut out);
            }
        }
    }

    for t in &tokens {
        for syn in lookup(SYNONYMS, t) {
            push(syn.to_string(), &mut out);
        }
    }
    for t in &tokens {
        for term in lookup(OPS_CONTEXT, t) {
            push(term.to_string(), &mut out);
        }
    }

    out.truncate(max);
    out
}

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub final_limit: usize,
    pub min_candidates: usize,
    /// Maximum fuzzy distance accepted by stages 1 and 2.
    pub fuzzy_threshold: f64,
    pub max_variations: usize,
    pub variation_penalty: f64,
    pub exact_match_confidence: f64,
    /// Used when the request carries no `confidence_threshold`.
    pub default_confidence_threshold: f64,
    pub weights: FieldWeights,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            final_limit: 10,
            min_candidates: 3,
            fuzzy_threshold: 0.5,
            max_variations: 10,
            variation_penalty: 0.15,
            exact_match_confidence: 0.7,
            default_confidence_threshold: 0.3,
            weights: FieldWeights::default(),
        }
    }
}

/// Identity of the source an engine answers for.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    pub source_type: SourceType,
    /// Empty means the source serves every category.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    Primary,
    Variations,
    ExactFallback,
}

/// Results plus the stages that actually ran.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub stages: Vec<SearchStage>,
}

#[derive(Debug, Clone)]
struct Candidate {
    distance: f64,
    stage: MatchStage,
}

/// Fuzzy-indexed document set for one source.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    info: SourceInfo,
    docs: Vec<SearchDocument>,
    index: FuzzyIndex,
    params: EngineParams,
}

impl SearchEngine {
    pub fn new(info: SourceInfo, docs: Vec<SearchDocument>, params: EngineParams) -> Self {
        let index = FuzzyIndex::build(&docs, params.weights);
        Self {
            info,
            docs,
            index,
            params,
        }
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn documents(&self) -> &[SearchDocument] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&SearchDocument> {
        self.docs.iter().find(|d| d.id == id)
    }

    /// Run the staged search. Never fails; an unanswerable request is empty.
    pub fn search(&self, query: &str, filters: &SearchFilters) -> SearchOutcome {
        let started = Instant::now();
        let mut outcome = SearchOutcome::default();

        let query = query.trim();
        if query.is_empty() || !filters.accepts_categories(&self.info.categories) {
            return outcome;
        }

        let now = Utc::now();
        let eligible: Vec<bool> = self
            .docs
            .iter()
            .map(|d| self.is_eligible(d, filters, now))
            .collect();
        let mut candidates: HashMap<usize, Candidate> = HashMap::new();

        outcome.stages.push(SearchStage::Primary);
        for hit in self.index.search(query, self.params.fuzzy_threshold) {
            if eligible[hit.doc_index] {
                candidates.insert(
                    hit.doc_index,
                    Candidate {
                        distance: hit.distance,
                        stage: MatchStage::Primary,
                    },
                );
            }
        }

        if candidates.len() < self.params.min_candidates {
            let variations = query_variations(query, self.params.max_variations);
            if !variations.is_empty() {
                outcome.stages.push(SearchStage::Variations);
            }
            for variation in variations {
                for hit in self.index.search(&variation, self.params.fuzzy_threshold) {
                    if eligible[hit.doc_index] && !candidates.contains_key(&hit.doc_index) {
                        candidates.insert(
                            hit.doc_index,
                            Candidate {
                                distance: hit.distance,
                                stage: MatchStage::Variation(variation.clone()),
                            },
                        );
                    }
                }
            }
        }

        // The literal scan always runs: a verbatim occurrence must survive
        // even when fuzzy hits on other documents filled the quota.
        let short = candidates.len() < self.params.min_candidates;
        let needle = query.to_lowercase();
        let mut recovered = 0;
        for (i, doc) in self.docs.iter().enumerate() {
            if !eligible[i] || candidates.contains_key(&i) {
                continue;
            }
            if contains_literal(doc, &needle) {
                candidates.insert(
                    i,
                    Candidate {
                        distance: 0.0,
                        stage: MatchStage::Exact,
                    },
                );
                recovered += 1;
            }
        }
        if short || recovered > 0 {
            outcome.stages.push(SearchStage::ExactFallback);
        }

        let threshold = filters
            .confidence_threshold
            .unwrap_or(self.params.default_confidence_threshold);

        let mut scored: Vec<(usize, confidence::Confidence)> = candidates
            .into_iter()
            .map(|(i, c)| {
                let conf = confidence::score(&ScoringInput {
                    query,
                    distance: c.distance,
                    stage: &c.stage,
                    doc: &self.docs[i],
                    now,
                    variation_penalty: self.params.variation_penalty,
                    exact_match_confidence: self.params.exact_match_confidence,
                });
                (i, conf)
            })
            .filter(|(_, conf)| conf.score >= threshold)
            .collect();

        scored.sort_by(|(ia, a), (ib, b)| {
            let (da, db) = (&self.docs[*ia], &self.docs[*ib]);
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(db.last_updated.cmp(&da.last_updated))
                .then(da.id.cmp(&db.id))
        });
        scored.truncate(filters.limit.unwrap_or(self.params.final_limit));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        outcome.results = scored
            .into_iter()
            .map(|(i, conf)| {
                document_to_result(
                    &self.docs[i],
                    &self.info,
                    conf.score,
                    conf.reasons,
                    elapsed_ms,
                )
            })
            .collect();
        outcome
    }

    fn is_eligible(
        &self,
        doc: &SearchDocument,
        filters: &SearchFilters,
        now: chrono::DateTime<Utc>,
    ) -> bool {
        if let (Some(wanted), Some(cat)) = (&filters.categories, &doc.category) {
            if !wanted.is_empty() && !wanted.iter().any(|w| w.eq_ignore_ascii_case(cat)) {
                return false;
            }
        }
        if let Some(days) = filters.max_age_days {
            if doc.last_updated < now - ChronoDuration::days(i64::from(days)) {
                return false;
            }
        }
        true
    }
}

fn contains_literal(doc: &SearchDocument, needle: &str) -> bool {
    doc.title.to_lowercase().contains(needle)
        || doc.content.to_lowercase().contains(needle)
        || doc.searchable_content.to_lowercase().contains(needle)
}

/// Convert a document into a result attributed to `info`.
pub fn document_to_result(
    doc: &SearchDocument,
    info: &SourceInfo,
    confidence_score: f64,
    match_reasons: Vec<String>,
    retrieval_time_ms: u64,
) -> SearchResult {
    let mut metadata = doc.metadata.clone();
    if !doc.path.is_empty() {
        metadata
            .entry("path")
            .or_insert_with(|| doc.path.clone().into());
    }
    if let Some(cat) = &doc.category {
        metadata
            .entry("category")
            .or_insert_with(|| cat.clone().into());
    }
    SearchResult {
        id: doc.id.clone(),
        title: doc.title.clone(),
        content: doc.content.clone(),
        source: info.name.clone(),
        source_type: info.source_type,
        confidence_score: confidence_score.clamp(0.0, 1.0),
        match_reasons,
        retrieval_time_ms,
        url: doc.url.clone(),
        last_updated: format_iso(&doc.last_updated),
        metadata,
    }
}
