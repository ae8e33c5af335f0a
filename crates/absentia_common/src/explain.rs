//! Explanation traces - why the engine concluded what it concluded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One explanation trace: which rule fired, its rationale, and the facts
/// that satisfied it. `facts_used` is ordered so rendering is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub facts_used: BTreeMap<String, Value>,
}

impl Trace {
    /// Render as a single `[rule-id] rationale (var=value, ...)` line.
    pub fn render(&self) -> String {
        let rationale = self.rationale.as_deref().unwrap_or("");
        let facts = self
            .facts_used
            .iter()
            .map(|(k, v)| format!("{k}={}", render_value(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("[{}] {} ({})", self.rule_id, rationale, facts)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a batch of traces, one line each.
pub fn format_explanation(traces: &[Trace]) -> String {
    traces.iter().map(Trace::render).collect::<Vec<_>>().join("\n")
}
