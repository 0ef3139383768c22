//! Structured runbooks: validation, synthesis from free text, and relevance.
//!
//! A value only becomes a [`Runbook`] if it carries a non-empty `triggers`
//! list, a `decision_tree` object, and at least one procedure. Anything
//! else is rejected by [`Runbook::from_json`], never patched up.
//!
//! When a source only has prose, [`synthesize_runbook`] extracts ordered
//! steps from it. Lines are matched against these markers, in order:
//!
//! | Marker | Example |
//! |--------|---------|
//! | `Step N:` | `Step 2: drain the node` |
//! | `N.` / `N)` | `3. restart the service` |
//! | `- ` / `* ` | `- check free space` |
//!
//! A document with no recognizable steps yields a single
//! `general_procedure` step holding a bounded excerpt.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::models::{AlertContext, SearchDocument};

/// Excerpt length for the fallback step.
pub const FALLBACK_EXCERPT_CHARS: usize = 500;
/// Upper bound on extracted steps per document.
pub const MAX_EXTRACTED_STEPS: usize = 50;

const STRUCTURED_CONFIDENCE: f64 = 0.6;
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Alert types that never describe a real signal.
const NON_SIGNAL_ALERTS: &[&str] = &[
    "test",
    "placeholder",
    "example",
    "dummy",
    "sample",
    "unknown",
    "none",
    "n/a",
    "null",
];

static STEP_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*step\s+(\d+)\s*[:.)\-]\s*(.+)$").ok());
static NUMBERED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)[.)]\s+(.+)$").ok());
static BULLET: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\s*[-*]\s+(.+)$").ok());
static INLINE_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"`([^`]+)`").ok());

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunbookError {
    #[error("runbook must be a JSON object")]
    NotAnObject,
    #[error("runbook has no triggers")]
    MissingTriggers,
    #[error("runbook has no decision_tree")]
    MissingDecisionTree,
    #[error("runbook has no procedures")]
    NoProcedures,
    #[error("malformed runbook: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionBranch {
    #[serde(default)]
    pub id: String,
    pub condition: String,
    #[serde(default)]
    pub description: String,
    pub action: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub branches: Vec<DecisionBranch>,
    #[serde(default)]
    pub default_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunbookMetadata {
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
    #[serde(default)]
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub triggers: Vec<String>,
    /// Alert severity → operational severity.
    #[serde(default)]
    pub severity_mapping: BTreeMap<String, String>,
    pub decision_tree: DecisionTree,
    pub procedures: Vec<ProcedureStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_path: Option<String>,
    #[serde(default)]
    pub metadata: RunbookMetadata,
}

impl Runbook {
    /// Validate and decode a structured runbook.
    pub fn from_json(value: &Value) -> Result<Self, RunbookError> {
        let obj = value.as_object().ok_or(RunbookError::NotAnObject)?;
        let has_triggers = obj
            .get("triggers")
            .and_then(Value::as_array)
            .map(|t| !t.is_empty())
            .unwrap_or(false);
        if !has_triggers {
            return Err(RunbookError::MissingTriggers);
        }
        if !obj.get("decision_tree").map(Value::is_object).unwrap_or(false) {
            return Err(RunbookError::MissingDecisionTree);
        }
        let has_procedures = obj
            .get("procedures")
            .and_then(Value::as_array)
            .map(|p| !p.is_empty())
            .unwrap_or(false);
        if !has_procedures {
            return Err(RunbookError::NoProcedures);
        }
        serde_json::from_value(value.clone()).map_err(|e| RunbookError::Malformed(e.to_string()))
    }

    /// Whether a JSON value has the shape of a runbook, valid or not.
    pub fn looks_like_runbook(value: &Value) -> bool {
        value
            .as_object()
            .map(|o| {
                o.contains_key("triggers")
                    || o.contains_key("decision_tree")
                    || o.contains_key("procedures")
            })
            .unwrap_or(false)
    }

    /// Flatten into a searchable document.
    pub fn to_document(&self, path: &str) -> SearchDocument {
        let mut content = String::new();
        if !self.description.is_empty() {
            content.push_str(&self.description);
            content.push('\n');
        }
        content.push_str(&format!("Triggers: {}\n", self.triggers.join(", ")));
        for (i, step) in self.procedures.iter().enumerate() {
            content.push_str(&format!("{}. {}\n", i + 1, step.description));
            if let Some(cmd) = &step.command {
                content.push_str(&format!("   `{}`\n", cmd));
            }
        }
        let mut metadata = serde_json::Map::new();
        metadata.insert("type".into(), Value::String("runbook".into()));
        metadata.insert("runbook_id".into(), Value::String(self.id.clone()));
        metadata.insert(
            "triggers".into(),
            Value::Array(self.triggers.iter().cloned().map(Value::String).collect()),
        );
        SearchDocument {
            id: self.id.clone(),
            title: self.title.clone(),
            searchable_content: format!(
                "{} {} {}",
                self.title,
                self.triggers.join(" "),
                self.description
            ),
            content,
            path: path.to_string(),
            category: Some("runbooks".to_string()),
            url: None,
            last_updated: chrono::Utc::now(),
            metadata,
        }
    }
}

/// A runbook candidate ranked against an alert.
#[derive(Debug, Clone, Serialize)]
pub struct RankedRunbook {
    pub source: String,
    pub relevance: f64,
    pub runbook: Runbook,
}

pub fn is_non_signal_alert(alert_type: &str) -> bool {
    let t = alert_type.trim().to_lowercase();
    t.is_empty() || NON_SIGNAL_ALERTS.contains(&t.as_str())
}

fn match_step(line: &str) -> Option<String> {
    for re in [&STEP_LABEL, &NUMBERED] {
        if let Some(caps) = re.as_ref().and_then(|r| r.captures(line)) {
            return caps.get(2).map(|m| m.as_str().trim().to_string());
        }
    }
    BULLET
        .as_ref()
        .and_then(|r| r.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn inline_command(text: &str) -> Option<String> {
    INLINE_CODE
        .as_ref()
        .and_then(|r| r.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Ordered procedure steps found in free text.
pub fn extract_steps(content: &str) -> Vec<ProcedureStep> {
    let mut in_fence = false;
    let mut steps = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(text) = match_step(line) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        let n = steps.len() + 1;
        steps.push(ProcedureStep {
            id: format!("step_{n}"),
            name: format!("Step {n}"),
            command: inline_command(&text),
            description: text,
            expected_outcome: "Step completed successfully".to_string(),
            timeout_secs: None,
            prerequisites: Vec::new(),
        });
        if steps.len() >= MAX_EXTRACTED_STEPS {
            break;
        }
    }
    steps
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Best-effort runbook from an unstructured document.
///
/// Returns `None` for non-signal alert types and for empty documents.
pub fn synthesize_runbook(doc: &SearchDocument, alert: &AlertContext) -> Option<Runbook> {
    if is_non_signal_alert(&alert.alert_type) || doc.content.trim().is_empty() {
        return None;
    }

    let mut procedures = extract_steps(&doc.content);
    let confidence = if procedures.is_empty() {
        procedures.push(ProcedureStep {
            id: "general_procedure".to_string(),
            name: "General procedure".to_string(),
            description: excerpt(&doc.content, FALLBACK_EXCERPT_CHARS),
            expected_outcome: "Issue investigated per source document".to_string(),
            command: None,
            timeout_secs: None,
            prerequisites: Vec::new(),
        });
        FALLBACK_CONFIDENCE
    } else {
        STRUCTURED_CONFIDENCE
    };

    let alert_type = alert.alert_type.trim().to_lowercase();
    let mut severity_mapping = BTreeMap::new();
    if !alert.severity.trim().is_empty() {
        severity_mapping.insert(alert.severity.to_lowercase(), alert.severity.to_lowercase());
    }
    let escalation_path = doc
        .content
        .to_lowercase()
        .contains("escalat")
        .then(|| format!("See escalation section in {}", doc.title));

    Some(Runbook {
        id: format!("synthetic_{}", doc.id),
        title: doc.title.clone(),
        version: "1.0".to_string(),
        description: excerpt(&doc.content, 200),
        triggers: vec![alert_type],
        severity_mapping,
        decision_tree: DecisionTree {
            id: format!("tree_{}", doc.id),
            name: "Follow documented procedure".to_string(),
            description: String::new(),
            branches: vec![DecisionBranch {
                id: "execute".to_string(),
                condition: "alert matches document".to_string(),
                description: "Run the extracted procedure".to_string(),
                action: "execute_procedure".to_string(),
                confidence,
            }],
            default_action: "escalate".to_string(),
        },
        procedures,
        escalation_path,
        metadata: RunbookMetadata {
            confidence_score: confidence,
            author: None,
            source_document: Some(doc.id.clone()),
            synthetic: true,
        },
    })
}

/// Relevance of a runbook to an alert, in `[0, 1]`.
///
/// | Signal | Weight |
/// |--------|--------|
/// | title contains alert type | 0.4 |
/// | description contains alert type | 0.2 |
/// | description contains severity | 0.1 |
/// | each affected system mentioned | 0.1 |
/// | severity mapping covers severity | 0.1 |
/// | a trigger matches alert type | 0.2 |
pub fn runbook_relevance(runbook: &Runbook, alert: &AlertContext) -> f64 {
    let alert_type = alert.alert_type.trim().to_lowercase();
    let severity = alert.severity.trim().to_lowercase();
    let title = runbook.title.to_lowercase();
    let description = runbook.description.to_lowercase();
    let mut score = 0.0;

    if !alert_type.is_empty() {
        if title.contains(&alert_type) {
            score += 0.4;
        }
        if description.contains(&alert_type) {
            score += 0.2;
        }
        let trigger_hit = runbook.triggers.iter().any(|t| {
            let t = t.trim().to_lowercase();
            !t.is_empty() && (t.contains(&alert_type) || alert_type.contains(&t))
        });
        if trigger_hit {
            score += 0.2;
        }
    }
    if !severity.is_empty() {
        if description.contains(&severity) {
            score += 0.1;
        }
        if runbook
            .severity_mapping
            .keys()
            .any(|k| k.eq_ignore_ascii_case(&severity))
        {
            score += 0.1;
        }
    }
    for system in &alert.affected_systems {
        let s = system.trim().to_lowercase();
        if !s.is_empty() && (title.contains(&s) || description.contains(&s)) {
            score += 0.1;
        }
    }
    f64::min(score, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "id": "rb-disk",
            "title": "Disk full",
            "version": "2.1",
            "description": "Handle critical disk_full alerts on web hosts",
            "triggers": ["disk_full"],
            "severity_mapping": { "critical": "sev1" },
            "decision_tree": {
                "id": "t1",
                "name": "disk",
                "branches": [
                    { "condition": "usage > 95%", "action": "cleanup", "confidence": 0.9 }
                ]
            },
            "procedures": [
                { "id": "s1", "description": "Rotate logs", "command": "logrotate -f /etc/logrotate.conf" }
            ]
        })
    }

    fn doc(content: &str) -> SearchDocument {
        SearchDocument {
            id: "doc-1".into(),
            title: "Disk cleanup".into(),
            content: content.into(),
            searchable_content: String::new(),
            path: String::new(),
            category: None,
            url: None,
            last_updated: chrono::Utc::now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_valid_runbook_parses() {
        let rb = Runbook::from_json(&valid()).unwrap();
        assert_eq!(rb.triggers, vec!["disk_full"]);
        assert_eq!(rb.procedures.len(), 1);
        assert_eq!(rb.decision_tree.branches[0].confidence, 0.9);
    }

    #[test]
    fn test_invalid_runbooks_rejected() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("decision_tree");
        assert_eq!(
            Runbook::from_json(&v),
            Err(RunbookError::MissingDecisionTree)
        );

        let mut v = valid();
        v["procedures"] = json!([]);
        assert_eq!(Runbook::from_json(&v), Err(RunbookError::NoProcedures));

        let mut v = valid();
        v["triggers"] = json!([]);
        assert_eq!(Runbook::from_json(&v), Err(RunbookError::MissingTriggers));

        let mut v = valid();
        v["decision_tree"] = json!("not an object");
        assert_eq!(
            Runbook::from_json(&v),
            Err(RunbookError::MissingDecisionTree)
        );

        assert_eq!(
            Runbook::from_json(&json!([1, 2])),
            Err(RunbookError::NotAnObject)
        );
    }

    #[test]
    fn test_extract_steps_in_marker_order() {
        let text = "Intro line\nStep 1: check `df -h`\n2. remove old logs\n3) restart nginx\n- verify health\n* page oncall\n```\n1. inside fence\n```\n";
        let steps = extract_steps(text);
        let descs: Vec<&str> = steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descs,
            vec![
                "check `df -h`",
                "remove old logs",
                "restart nginx",
                "verify health",
                "page oncall"
            ]
        );
        assert_eq!(steps[0].command.as_deref(), Some("df -h"));
        assert_eq!(steps[0].id, "step_1");
        assert_eq!(steps[4].id, "step_5");
    }

    #[test]
    fn test_synthesis_with_steps() {
        let rb = synthesize_runbook(
            &doc("1. free space\n2. restart service\nEscalate to storage team."),
            &AlertContext::new("disk_full", "critical"),
        )
        .unwrap();
        assert_eq!(rb.procedures.len(), 2);
        assert_eq!(rb.metadata.confidence_score, 0.6);
        assert!(rb.metadata.synthetic);
        assert!(rb.escalation_path.is_some());
        assert_eq!(rb.triggers, vec!["disk_full"]);
        // A synthesized runbook is itself valid.
        let back = Runbook::from_json(&serde_json::to_value(&rb).unwrap()).unwrap();
        assert_eq!(back, rb);
    }

    #[test]
    fn test_synthesis_fallback_step_is_bounded() {
        let long = "word ".repeat(400);
        let rb = synthesize_runbook(&doc(&long), &AlertContext::new("disk_full", "")).unwrap();
        assert_eq!(rb.procedures.len(), 1);
        assert_eq!(rb.procedures[0].id, "general_procedure");
        assert!(rb.procedures[0].description.chars().count() <= FALLBACK_EXCERPT_CHARS + 3);
        assert_eq!(rb.metadata.confidence_score, 0.3);
    }

    #[test]
    fn test_non_signal_alerts_rejected() {
        for t in ["test", "PLACEHOLDER", " n/a ", "", "unknown"] {
            assert!(
                synthesize_runbook(&doc("1. do it"), &AlertContext::new(t, "high")).is_none(),
                "{t:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_relevance_weights() {
        let rb = Runbook::from_json(&valid()).unwrap();
        let alert = AlertContext::new("disk_full", "critical").with_systems(vec!["web".into()]);
        // description 0.2 + trigger 0.2 + severity text 0.1 + mapping 0.1 + system 0.1
        assert!((runbook_relevance(&rb, &alert) - 0.7).abs() < 1e-9);

        let unrelated = AlertContext::new("cpu_high", "low");
        assert_eq!(runbook_relevance(&rb, &unrelated), 0.0);

        let many = AlertContext::new("disk", "critical").with_systems(
            (0..20).map(|i| format!("disk{i}")).collect::<Vec<_>>(),
        );
        assert!(runbook_relevance(&rb, &many) <= 1.0);
    }

    #[test]
    fn test_blank_trigger_never_matches() {
        let mut v = valid();
        v["triggers"] = json!(["", "  "]);
        let rb = Runbook::from_json(&v).unwrap();
        let alert = AlertContext::new("cpu_high", "low");
        assert_eq!(runbook_relevance(&rb, &alert), 0.0);
    }
}
