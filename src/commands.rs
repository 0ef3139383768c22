//! CLI command implementations for `rbh`.
//!
//! Each `run_*` function drives the registry and prints a human-readable
//! report to stdout. Rendering is split out so the formats can be tested.

use anyhow::{bail, Result};
use std::fmt::Write as _;

use crate::models::{format_iso, AlertContext, HealthCheck, SearchFilters, SearchResult, SourceMetadata};
use crate::registry::SourceRegistry;
use crate::runbook::RankedRunbook;

const EXCERPT_CHARS: usize = 160;

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

pub fn render_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{:.2}] {} / {}",
            i + 1,
            r.confidence_score,
            r.source,
            r.title
        );
        let _ = writeln!(out, "    updated: {}", r.last_updated);
        if let Some(url) = &r.url {
            let _ = writeln!(out, "    url: {}", url);
        }
        let _ = writeln!(out, "    why: {}", r.match_reasons.join("; "));
        let _ = writeln!(out, "    excerpt: \"{}\"", excerpt(&r.content));
        let _ = writeln!(out, "    id: {}", r.id);
        out.push('\n');
    }
    out
}

pub fn render_runbooks(runbooks: &[RankedRunbook]) -> String {
    if runbooks.is_empty() {
        return "No runbooks.\n".to_string();
    }
    let mut out = String::new();
    for (i, ranked) in runbooks.iter().enumerate() {
        let rb = &ranked.runbook;
        let kind = if rb.metadata.synthetic {
            "synthesized"
        } else {
            "structured"
        };
        let _ = writeln!(
            out,
            "{}. [{:.2}] {} / {} ({})",
            i + 1,
            ranked.relevance,
            ranked.source,
            rb.title,
            kind
        );
        let _ = writeln!(out, "    triggers: {}", rb.triggers.join(", "));
        for (n, step) in rb.procedures.iter().enumerate() {
            let _ = writeln!(out, "    {}. {}", n + 1, step.description);
            if let Some(cmd) = &step.command {
                let _ = writeln!(out, "       $ {}", cmd);
            }
        }
        if let Some(escalation) = &rb.escalation_path {
            let _ = writeln!(out, "    escalate: {}", escalation);
        }
        let _ = writeln!(out, "    id: {}", rb.id);
        out.push('\n');
    }
    out
}

pub fn render_sources(health: &[HealthCheck], metadata: &[SourceMetadata]) -> String {
    let mut out = format!(
        "{:<16} {:<12} {:<8} {:<10} {:>6}\n",
        "SOURCE", "TYPE", "HEALTHY", "CIRCUIT", "DOCS"
    );
    for check in health {
        let meta = metadata.iter().find(|m| m.name == check.source_name);
        let circuit = meta
            .map(|m| format!("{:?}", m.circuit_state).to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        let docs = meta
            .map(|m| m.document_count.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<16} {:<12} {:<8} {:<10} {:>6}",
            check.source_name,
            check.source_type.to_string(),
            check.healthy,
            circuit,
            docs
        );
        if let Some(err) = &check.error_message {
            let _ = writeln!(out, "    error: {}", err);
        }
    }
    out
}

pub async fn list_sources(registry: &SourceRegistry) -> Result<()> {
    if registry.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }
    let (health, metadata) = tokio::join!(registry.health_check_all(), registry.metadata_all());
    print!("{}", render_sources(&health, &metadata));
    Ok(())
}

pub async fn run_search(
    registry: &SourceRegistry,
    query: &str,
    filters: SearchFilters,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let results = registry.search(query, &filters).await?;
    print!("{}", render_results(&results));
    Ok(())
}

pub async fn run_runbooks(registry: &SourceRegistry, alert: AlertContext) -> Result<()> {
    let runbooks = registry.search_runbooks(&alert).await?;
    print!("{}", render_runbooks(&runbooks));
    Ok(())
}

pub async fn run_get(registry: &SourceRegistry, source: &str, id: &str) -> Result<()> {
    let Some(doc) = registry.get_document(source, id).await? else {
        bail!("document not found: {}/{}", source, id);
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("title:        {}", doc.title);
    println!("source:       {} ({})", doc.source, doc.source_type);
    if let Some(url) = &doc.url {
        println!("url:          {}", url);
    }
    println!("updated_at:   {}", doc.last_updated);
    println!("retrieved_at: {}", format_iso(&chrono::Utc::now()));
    println!("metadata:     {}", serde_json::Value::Object(doc.metadata.clone()));
    println!();
    println!("--- Body ---");
    println!("{}", doc.content);
    Ok(())
}
