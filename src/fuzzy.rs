//! Token-weighted fuzzy index.
//!
//! Each document is tokenized into four fields with fixed weights:
//!
//! | Field | Weight |
//! |-------|--------|
//! | title | 0.25 |
//! | searchable content | 0.50 |
//! | raw content | 0.15 |
//! | path | 0.10 |
//!
//! A query token matches a field token exactly (1.0), as a prefix (0.9),
//! as an inner substring (0.85), or by normalized edit distance when the
//! similarity is at least [`MIN_TOKEN_SIMILARITY`]. A field's similarity is
//! the mean of each query token's best match; the document distance is
//! `1 - Σ weight × similarity`, so `0.0` is a perfect match.

use std::collections::HashSet;

use crate::models::SearchDocument;

/// Edit-distance similarity below this is treated as no match.
pub const MIN_TOKEN_SIMILARITY: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub searchable: f64,
    pub content: f64,
    pub path: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 0.25,
            searchable: 0.50,
            content: 0.15,
            path: 0.10,
        }
    }
}

impl FieldWeights {
    fn total(&self) -> f64 {
        self.title + self.searchable + self.content + self.path
    }
}

/// Lowercase alphanumeric tokens of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Character-level Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in `[0, 1]` between a query token and a document token.
pub fn token_similarity(query: &str, token: &str) -> f64 {
    if query == token {
        return 1.0;
    }
    let q_len = query.chars().count();
    let t_len = token.chars().count();
    if q_len >= 3 && token.starts_with(query) {
        return 0.9;
    }
    if q_len >= 4 && token.contains(query) {
        return 0.85;
    }
    let longest = q_len.max(t_len);
    // Length gap alone already rules out the threshold.
    if (q_len.abs_diff(t_len) as f64) > longest as f64 * (1.0 - MIN_TOKEN_SIMILARITY) {
        return 0.0;
    }
    let sim = 1.0 - levenshtein(query, token) as f64 / longest as f64;
    if sim >= MIN_TOKEN_SIMILARITY {
        sim
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
struct FieldTokens {
    set: HashSet<String>,
    unique: Vec<String>,
}

impl FieldTokens {
    fn from_text(text: &str) -> Self {
        let mut set = HashSet::new();
        let mut unique = Vec::new();
        for t in tokenize(text) {
            if set.insert(t.clone()) {
                unique.push(t);
            }
        }
        Self { set, unique }
    }

    fn similarity(&self, query_tokens: &[String]) -> f64 {
        if query_tokens.is_empty() || self.unique.is_empty() {
            return 0.0;
        }
        let sum: f64 = query_tokens
            .iter()
            .map(|q| {
                if self.set.contains(q) {
                    1.0
                } else {
                    self.unique
                        .iter()
                        .map(|t| token_similarity(q, t))
                        .fold(0.0, f64::max)
                }
            })
            .sum();
        sum / query_tokens.len() as f64
    }
}

#[derive(Debug, Clone)]
struct IndexedFields {
    title: FieldTokens,
    searchable: FieldTokens,
    content: FieldTokens,
    path: FieldTokens,
}

/// One fuzzy match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyHit {
    /// Position of the document in the indexed slice.
    pub doc_index: usize,
    /// `0.0` is a perfect match, `1.0` no match at all.
    pub distance: f64,
}

/// Fuzzy index over a fixed document set.
#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    entries: Vec<IndexedFields>,
    weights: FieldWeights,
}

impl FuzzyIndex {
    pub fn build(docs: &[SearchDocument], weights: FieldWeights) -> Self {
        let entries = docs
            .iter()
            .map(|d| IndexedFields {
                title: FieldTokens::from_text(&d.title),
                searchable: FieldTokens::from_text(&d.searchable_content),
                content: FieldTokens::from_text(&d.content),
                path: FieldTokens::from_text(&d.path),
            })
            .collect();
        Self { entries, weights }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weighted distance between the query tokens and one document.
    pub fn distance(&self, doc_index: usize, query_tokens: &[String]) -> f64 {
        let Some(e) = self.entries.get(doc_index) else {
            return 1.0;
        };
        let w = &self.weights;
        let total = w.total();
        if total <= 0.0 {
            return 1.0;
        }
        let sim = w.title * e.title.similarity(query_tokens)
            + w.searchable * e.searchable.similarity(query_tokens)
            + w.content * e.content.similarity(query_tokens)
            + w.path * e.path.similarity(query_tokens);
        (1.0 - sim / total).clamp(0.0, 1.0)
    }

    /// All documents within `threshold` distance, best first.
    pub fn search(&self, query: &str, threshold: f64) -> Vec<FuzzyHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<FuzzyHit> = (0..self.entries.len())
            .map(|i| FuzzyHit {
                doc_index: i,
                distance: self.distance(i, &query_tokens),
            })
            .filter(|h| h.distance <= threshold)
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_index.cmp(&b.doc_index))
        });
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn doc(title: &str, searchable: &str, content: &str, path: &str) -> SearchDocument {
        SearchDocument {
            id: title.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            searchable_content: searchable.to_string(),
            path: path.to_string(),
            category: None,
            url: None,
            last_updated: Utc::now(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Disk-Space: /var is 95% full!"),
            vec!["disk", "space", "var", "is", "95", "full"]
        );
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_token_similarity_tiers() {
        assert_eq!(token_similarity("disk", "disk"), 1.0);
        assert_eq!(token_similarity("mem", "memory"), 0.9);
        assert_eq!(token_similarity("space", "diskspace"), 0.85);
        // One typo in an eight-letter word.
        assert!((token_similarity("databse", "database") - 0.875).abs() < 1e-9);
        assert_eq!(token_similarity("disk", "network"), 0.0);
    }

    #[test]
    fn test_title_and_searchable_outweigh_content() {
        let docs = vec![
            doc("Disk full", "disk full cleanup", "", ""),
            doc("Other", "unrelated", "mentions disk full somewhere", ""),
        ];
        let index = FuzzyIndex::build(&docs, FieldWeights::default());
        let strong = index.distance(0, &tokenize("disk full"));
        let weak = index.distance(1, &tokenize("disk full"));
        assert!(strong < 0.3, "got {strong}");
        assert!((weak - 0.85).abs() < 1e-9, "got {weak}");
    }

    #[test]
    fn test_search_orders_by_distance_and_applies_threshold() {
        let docs = vec![
            doc("Memory leak", "heap grows memory leak", "", "runbooks/memory"),
            doc("Memory pressure", "memory", "", ""),
            doc("TLS certificates", "certificate rotation", "", ""),
        ];
        let index = FuzzyIndex::build(&docs, FieldWeights::default());
        let hits = index.search("memory leak", 0.7);
        assert_eq!(hits.len(), 2);
        assert_eq!(index.search("memory leak", 0.5).len(), 1);
        assert_eq!(hits[0].doc_index, 0);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(index.search("", 1.0).is_empty());
    }
}
