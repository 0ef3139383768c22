//! End-to-end ranking scenarios over a single source's engine.

use chrono::{Duration, Utc};
use runbook_harness::models::{SearchDocument, SearchFilters, SourceType};
use runbook_harness::search::{EngineParams, SearchEngine, SearchStage, SourceInfo};
use serde_json::Map;

fn doc(id: &str, title: &str, content: &str, path: &str) -> SearchDocument {
    SearchDocument {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        searchable_content: content.to_string(),
        path: path.to_string(),
        category: None,
        url: None,
        last_updated: Utc::now() - Duration::days(1),
        metadata: Map::new(),
    }
}

fn engine(docs: Vec<SearchDocument>, params: EngineParams) -> SearchEngine {
    SearchEngine::new(
        SourceInfo {
            name: "kb".to_string(),
            source_type: SourceType::Custom,
            categories: Vec::new(),
        },
        docs,
        params,
    )
}

fn storage_docs() -> Vec<SearchDocument> {
    vec![
        doc(
            "literal",
            "Disk space cleanup",
            "Free disk space by rotating logs.",
            "ops/cleanup.md",
        ),
        doc(
            "synonym",
            "Storage capacity cleanup",
            "Free storage capacity by rotating logs.",
            "ops/storage.md",
        ),
    ]
}

#[test]
fn synonym_match_found_only_through_variations_and_ranked_lower() {
    let eng = engine(storage_docs(), EngineParams::default());
    let outcome = eng.search("disk space", &SearchFilters::default());

    assert_eq!(
        outcome.stages,
        vec![
            SearchStage::Primary,
            SearchStage::Variations,
            SearchStage::ExactFallback
        ]
    );
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["literal", "synonym"]);

    let literal = &outcome.results[0];
    let synonym = &outcome.results[1];
    assert!(synonym.confidence_score < literal.confidence_score);
    assert!(synonym
        .match_reasons
        .iter()
        .any(|r| r.starts_with("Matched via query variation")));
    assert!(!literal
        .match_reasons
        .iter()
        .any(|r| r.starts_with("Matched via query variation")));
}

#[test]
fn synonym_match_absent_without_variation_stage() {
    let params = EngineParams {
        max_variations: 0,
        ..EngineParams::default()
    };
    let eng = engine(storage_docs(), params);
    let outcome = eng.search("disk space", &SearchFilters::default());

    assert!(!outcome.stages.contains(&SearchStage::Variations));
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["literal"]);
}

#[test]
fn exact_fallback_recovers_literal_buried_in_content() {
    let mut buried = doc(
        "cache",
        "Cache notes",
        "# Cache notes\n\nGeneral description of the cache tier.\n\nThe legacy flag zqx-disable-warmup stays off.",
        "kb/cache.md",
    );
    buried.searchable_content = "Cache notes\nGeneral description of the cache tier.".to_string();
    let eng = engine(
        vec![buried, doc("other", "DNS", "Flush resolvers.", "kb/dns.md")],
        EngineParams::default(),
    );

    let outcome = eng.search("zqx-disable-warmup", &SearchFilters::default());
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "cache");
    assert!((outcome.results[0].confidence_score - 0.7).abs() < 1e-9);
    assert_eq!(outcome.results[0].match_reasons, vec!["Exact text match"]);
}

#[test]
fn every_score_is_within_unit_interval() {
    let mut docs = storage_docs();
    docs.push(doc(
        "dense",
        "Runbook: disk space troubleshooting procedure",
        "Runbook procedure to troubleshoot disk space. Step 1: check disk space. Step 2: resolve.",
        "runbooks/ops/sre/incident/disk-space.md",
    ));
    let eng = engine(docs, EngineParams::default());
    let results = eng
        .search(
            "disk space",
            &SearchFilters {
                confidence_threshold: Some(0.0),
                ..Default::default()
            },
        )
        .results;
    assert!(!results.is_empty());
    for r in &results {
        assert!((0.0..=1.0).contains(&r.confidence_score), "{}", r.confidence_score);
    }
    assert_eq!(results[0].id, "dense");
}
