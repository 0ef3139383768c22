//! Text extraction from source payloads into [`SearchDocument`]s.
//!
//! Backends hand over raw text (markdown, plain text, JSON) plus a location;
//! this module condenses it into the weighted fields the fuzzy index uses.
//! JSON payloads that validate as runbooks are kept structured.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::SearchDocument;
use crate::runbook::Runbook;

/// Bound on the unstructured part of `searchable_content`.
const SEARCHABLE_FALLBACK_CHARS: usize = 1000;

/// Lines containing any of these are treated as salient.
const SALIENT_TERMS: &[&str] = &[
    "alert",
    "error",
    "warning",
    "fail",
    "restart",
    "resolve",
    "mitigat",
    "rollback",
    "escalat",
    "symptom",
    "cause",
    "impact",
];

/// Extraction error; the caller skips the payload.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("invalid runbook: {0}")]
    Runbook(String),
}

/// What a single payload turned into.
#[derive(Debug, Clone)]
pub enum Extracted {
    Document(SearchDocument),
    /// A structured runbook plus its flattened searchable form.
    Runbook(Box<Runbook>, SearchDocument),
}

impl Extracted {
    pub fn document(&self) -> &SearchDocument {
        match self {
            Extracted::Document(d) => d,
            Extracted::Runbook(_, d) => d,
        }
    }
}

/// Condensed text for the heaviest-weighted match field.
///
/// Keeps headings, list items, salient lines, and the first paragraph.
pub fn searchable_content(text: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let first_paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'));
    if let Some(p) = first_paragraph {
        parts.push(prefix_chars(p, SEARCHABLE_FALLBACK_CHARS));
    }
    for line in text.lines() {
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        let lower = t.to_lowercase();
        let is_heading = t.starts_with('#');
        let is_list = t.starts_with("- ")
            || t.starts_with("* ")
            || t.split_once(['.', ')'])
                .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
        let is_salient = SALIENT_TERMS.iter().any(|s| lower.contains(s));
        if is_heading || is_list || is_salient {
            parts.push(t.trim_start_matches('#').trim());
        }
    }
    if parts.is_empty() {
        return prefix_chars(text, SEARCHABLE_FALLBACK_CHARS).to_string();
    }
    parts.join("\n")
}

fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First `# ` heading, or the fallback.
pub fn markdown_title(text: &str, fallback: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// First directory component of a relative path, if any.
pub fn category_from_path(relative_path: &str) -> Option<String> {
    let mut parts = relative_path.split(['/', '\\']).filter(|p| !p.is_empty());
    let first = parts.next()?;
    parts.next().map(|_| first.to_string())
}

fn file_stem(relative_path: &str) -> &str {
    let name = relative_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(relative_path);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

/// Build a document from a text payload at `relative_path`.
pub fn text_document(
    relative_path: &str,
    body: &str,
    last_updated: DateTime<Utc>,
    url: Option<String>,
) -> SearchDocument {
    let mut metadata = Map::new();
    metadata.insert("path".into(), Value::String(relative_path.to_string()));
    SearchDocument {
        id: relative_path.to_string(),
        title: markdown_title(body, file_stem(relative_path)),
        searchable_content: searchable_content(body),
        content: body.to_string(),
        path: relative_path.to_string(),
        category: category_from_path(relative_path),
        url,
        last_updated,
        metadata,
    }
}

/// Extract a payload by file extension.
///
/// JSON that looks like a runbook must validate as one; a runbook-shaped
/// payload that fails validation is an error rather than a plain document.
pub fn extract_file(
    relative_path: &str,
    body: &str,
    last_updated: DateTime<Utc>,
    url: Option<String>,
) -> Result<Extracted, ExtractError> {
    let ext = relative_path
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" | "txt" | "rst" => Ok(Extracted::Document(text_document(
            relative_path,
            body,
            last_updated,
            url,
        ))),
        "json" => {
            let value: Value =
                serde_json::from_str(body).map_err(|e| ExtractError::Json(e.to_string()))?;
            if Runbook::looks_like_runbook(&value) {
                let runbook =
                    Runbook::from_json(&value).map_err(|e| ExtractError::Runbook(e.to_string()))?;
                let mut doc = runbook.to_document(relative_path);
                doc.last_updated = last_updated;
                doc.url = url;
                if let Some(cat) = category_from_path(relative_path) {
                    doc.category = Some(cat);
                }
                Ok(Extracted::Runbook(Box::new(runbook), doc))
            } else {
                let pretty = serde_json::to_string_pretty(&value)
                    .map_err(|e| ExtractError::Json(e.to_string()))?;
                let mut doc = text_document(relative_path, &pretty, last_updated, url);
                if let Some(title) = value.get("title").and_then(Value::as_str) {
                    doc.title = title.to_string();
                }
                Ok(Extracted::Document(doc))
            }
        }
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_title_and_category() {
        let body = "Intro\n# Disk Full Runbook\n\nText";
        assert_eq!(markdown_title(body, "x"), "Disk Full Runbook");
        assert_eq!(markdown_title("no heading", "fallback"), "fallback");
        assert_eq!(category_from_path("runbooks/disk.md").as_deref(), Some("runbooks"));
        assert_eq!(category_from_path("top.md"), None);
    }

    #[test]
    fn test_searchable_content_keeps_salient_lines() {
        let body = "# Disk full\n\nWhen /var fills up.\n\nSome filler text.\n\n1. Check usage\n- Rotate logs\nIf the error persists, escalate.\nUnrelated closing words.";
        let s = searchable_content(body);
        assert!(s.contains("Disk full"));
        assert!(s.contains("When /var fills up."));
        assert!(s.contains("1. Check usage"));
        assert!(s.contains("- Rotate logs"));
        assert!(s.contains("escalate"));
        assert!(!s.contains("Unrelated closing"));
        assert!(!s.contains("filler"));
    }

    #[test]
    fn test_searchable_content_is_bounded() {
        let s = searchable_content(&"x".repeat(3000));
        assert_eq!(s.chars().count(), 1000);
    }

    #[test]
    fn test_extract_markdown() {
        let e = extract_file("ops/disk.md", "# Disk\n\nclean up", Utc::now(), None).unwrap();
        let d = e.document();
        assert_eq!(d.id, "ops/disk.md");
        assert_eq!(d.title, "Disk");
        assert_eq!(d.category.as_deref(), Some("ops"));
        assert!(matches!(e, Extracted::Document(_)));
    }

    #[test]
    fn test_extract_runbook_json() {
        let body = r#"{
            "id": "rb-1", "title": "Memory pressure", "triggers": ["oom"],
            "decision_tree": {"branches": []},
            "procedures": [{"id": "s1", "description": "Capture heap dump"}]
        }"#;
        match extract_file("runbooks/oom.json", body, Utc::now(), None).unwrap() {
            Extracted::Runbook(rb, doc) => {
                assert_eq!(rb.id, "rb-1");
                assert_eq!(doc.category.as_deref(), Some("runbooks"));
                assert!(doc.content.contains("Capture heap dump"));
                assert_eq!(doc.metadata["type"], "runbook");
            }
            other => panic!("expected runbook, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_runbook_json_is_error() {
        let body = r#"{"id": "rb-2", "title": "x", "triggers": ["a"], "procedures": []}"#;
        assert!(matches!(
            extract_file("rb.json", body, Utc::now(), None),
            Err(ExtractError::Runbook(_))
        ));
        assert!(matches!(
            extract_file("a.json", "{not json", Utc::now(), None),
            Err(ExtractError::Json(_))
        ));
        assert!(matches!(
            extract_file("a.bin", "", Utc::now(), None),
            Err(ExtractError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_plain_json_document() {
        let e = extract_file("kb/a.json", r#"{"title": "DNS notes", "body": "flush"}"#, Utc::now(), None)
            .unwrap();
        assert_eq!(e.document().title, "DNS notes");
        assert!(matches!(e, Extracted::Document(_)));
    }
}
