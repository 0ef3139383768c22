//! Multi-factor confidence scoring.
//!
//! Confidence is a capped sum of independent, named factors:
//!
//! | Factor | Cap | Fires when |
//! |--------|-----|------------|
//! | base | 0.60 | always; `(1 - distance) × 0.6` |
//! | title | 0.20 | title contains the query, or some of its terms |
//! | phrase | 0.10 | content contains the query verbatim |
//! | path | 0.10 | path or metadata marks operational docs |
//! | recency | 0.10 | updated < 7 days (0.10), < 30 (0.05), < 90 (0.02) |
//! | content type | 0.10 | operational indicator terms present (0.025 each) |
//! | variation penalty | - | match came only from a query variation |
//!
//! The total is clamped to `[0, 1]`. Capping each factor keeps one signal
//! (say, a very long content match) from drowning out title relevance.
//! Matches from the exact-substring fallback bypass the factors and get a
//! fixed confidence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fuzzy::tokenize;
use crate::models::SearchDocument;

pub const BASE_CAP: f64 = 0.6;
pub const TITLE_CAP: f64 = 0.2;
pub const PHRASE_CAP: f64 = 0.1;
pub const PATH_CAP: f64 = 0.1;
pub const RECENCY_CAP: f64 = 0.1;
pub const CONTENT_TYPE_CAP: f64 = 0.1;

const PATH_MARKERS: &[&str] = &[
    "runbook", "playbook", "procedure", "docs", "ops", "sre", "incident",
];
const CONTENT_INDICATORS: &[&str] = &[
    "procedure",
    "troubleshoot",
    "runbook",
    "step",
    "resolution",
    "escalat",
    "mitigat",
    "rollback",
];

/// How a candidate was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", content = "term", rename_all = "snake_case")]
pub enum MatchStage {
    /// Fuzzy match against the original query.
    Primary,
    /// Fuzzy match against a derived query variation.
    Variation(String),
    /// Case-insensitive substring fallback.
    Exact,
}

/// Individual factor contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConfidenceFactors {
    pub base: f64,
    pub title: f64,
    pub phrase: f64,
    pub path: f64,
    pub recency: f64,
    pub content_type: f64,
    pub penalty: f64,
}

impl ConfidenceFactors {
    pub fn total(&self) -> f64 {
        let sum = self.base + self.title + self.phrase + self.path + self.recency + self.content_type
            - self.penalty;
        sum.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Confidence {
    pub score: f64,
    pub factors: ConfidenceFactors,
    pub reasons: Vec<String>,
}

/// Everything the scorer needs about one candidate.
#[derive(Debug, Clone)]
pub struct ScoringInput<'a> {
    pub query: &'a str,
    pub distance: f64,
    pub stage: &'a MatchStage,
    pub doc: &'a SearchDocument,
    pub now: DateTime<Utc>,
    pub variation_penalty: f64,
    pub exact_match_confidence: f64,
}

pub fn base_factor(distance: f64) -> f64 {
    (1.0 - distance.clamp(0.0, 1.0)) * BASE_CAP
}

pub fn title_factor(query: &str, title: &str) -> (f64, Option<String>) {
    let q = query.trim().to_lowercase();
    let t = title.to_lowercase();
    if q.is_empty() || t.is_empty() {
        return (0.0, None);
    }
    if t.contains(&q) {
        return (TITLE_CAP, Some("Title contains query".to_string()));
    }
    let q_tokens = tokenize(&q);
    if q_tokens.is_empty() {
        return (0.0, None);
    }
    let t_tokens = tokenize(&t);
    let matched = q_tokens.iter().filter(|q| t_tokens.contains(q)).count();
    if matched == 0 {
        return (0.0, None);
    }
    let boost = (matched as f64 / q_tokens.len() as f64) * (TITLE_CAP / 2.0);
    (
        boost.min(TITLE_CAP),
        Some(format!(
            "Title matches {} of {} query terms",
            matched,
            q_tokens.len()
        )),
    )
}

pub fn phrase_factor(query: &str, content: &str) -> (f64, Option<String>) {
    let q = query.trim().to_lowercase();
    if q.chars().count() < 3 || !content.to_lowercase().contains(&q) {
        return (0.0, None);
    }
    (PHRASE_CAP, Some("Exact phrase in content".to_string()))
}

pub fn path_factor(doc: &SearchDocument) -> (f64, Option<String>) {
    let path = doc.path.to_lowercase();
    let mut boost: f64 = PATH_MARKERS
        .iter()
        .filter(|m| path.contains(*m))
        .map(|_| 0.05)
        .sum();
    let runbook_meta = doc
        .metadata
        .get("type")
        .and_then(|v| v.as_str())
        .map(|t| t.eq_ignore_ascii_case("runbook"))
        .unwrap_or(false)
        || doc.metadata.contains_key("runbook");
    if runbook_meta {
        boost += 0.05;
    }
    if boost <= 0.0 {
        return (0.0, None);
    }
    (
        boost.min(PATH_CAP),
        Some("Location indicates operational docs".to_string()),
    )
}

pub fn recency_factor(last_updated: &DateTime<Utc>, now: &DateTime<Utc>) -> (f64, Option<String>) {
    let age_days = (*now - *last_updated).num_days().max(0);
    if age_days < 7 {
        (RECENCY_CAP, Some("Updated within 7 days".to_string()))
    } else if age_days < 30 {
        (0.05, Some("Updated within 30 days".to_string()))
    } else if age_days < 90 {
        (0.02, Some("Updated within 90 days".to_string()))
    } else {
        (0.0, None)
    }
}

pub fn content_type_factor(content: &str) -> (f64, Option<String>) {
    let lower = content.to_lowercase();
    let found: Vec<&str> = CONTENT_INDICATORS
        .iter()
        .copied()
        .filter(|term| lower.contains(term))
        .collect();
    if found.is_empty() {
        return (0.0, None);
    }
    let boost = (found.len() as f64 * 0.025).min(CONTENT_TYPE_CAP);
    (boost, Some(format!("Operational content: {}", found.join(", "))))
}

/// Score one candidate.
pub fn score(input: &ScoringInput<'_>) -> Confidence {
    if *input.stage == MatchStage::Exact {
        let score = input.exact_match_confidence.clamp(0.0, 1.0);
        return Confidence {
            score,
            factors: ConfidenceFactors {
                base: score,
                ..Default::default()
            },
            reasons: vec!["Exact text match".to_string()],
        };
    }

    let mut factors = ConfidenceFactors {
        base: base_factor(input.distance),
        ..Default::default()
    };
    let mut reasons = vec![format!("Fuzzy match (distance {:.2})", input.distance)];

    let mut apply = |slot: &mut f64, (value, reason): (f64, Option<String>)| {
        *slot = value;
        if let Some(r) = reason {
            reasons.push(r);
        }
    };
    apply(&mut factors.title, title_factor(input.query, &input.doc.title));
    apply(&mut factors.phrase, phrase_factor(input.query, &input.doc.content));
    apply(&mut factors.path, path_factor(input.doc));
    apply(
        &mut factors.recency,
        recency_factor(&input.doc.last_updated, &input.now),
    );
    apply(
        &mut factors.content_type,
        content_type_factor(&input.doc.content),
    );

    if let MatchStage::Variation(term) = input.stage {
        factors.penalty = input.variation_penalty.max(0.0);
        reasons.push(format!("Matched via query variation '{}'", term));
    }

    Confidence {
        score: factors.total(),
        factors,
        reasons,
    }
}
