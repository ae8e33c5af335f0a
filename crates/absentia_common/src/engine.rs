//! Forward- and backward-chaining inference over the fact store.
//!
//! Forward chaining evaluates the rule set round by round until no rule
//! fires, with a hard cap of 5 rounds as a safety valve against cyclic
//! rule interactions. The cap is not a convergence proof: a rule set
//! still changing facts at the cap is flagged (`converged = false`) and
//! logged, never silently truncated.
//!
//! Backward chaining answers "what is still missing for this goal":
//! each goal carries a static required-slot list plus conditional
//! requirements, and a fully satisfied goal triggers one forward pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::derive::derive_states;
use crate::explain::Trace;
use crate::facts::{append_unique, is_filled, parse_date_value, Facts};
use crate::kb::{Action, ActionOp, CondOp, KnowledgeBase};

/// Hard cap on forward-chaining rounds.
pub const MAX_ROUNDS: usize = 5;

/// Accepted values for the family-illness relationship slot.
pub const RELATIONSHIP_DOMAIN: [&str; 5] = ["father", "mother", "child", "spouse", "other"];

// ============================================================================
// Goals
// ============================================================================

/// The closed set of conversation goals the resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    CreateCase,
    AttachDocument,
    QueryStatus,
    ModifyCase,
    CancelCase,
}

impl Goal {
    /// Parse the wire name (`create_case`, `attach_document`, ...).
    pub fn parse(s: &str) -> Option<Goal> {
        match s {
            "create_case" => Some(Goal::CreateCase),
            "attach_document" => Some(Goal::AttachDocument),
            "query_status" => Some(Goal::QueryStatus),
            "modify_case" => Some(Goal::ModifyCase),
            "cancel_case" => Some(Goal::CancelCase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::CreateCase => "create_case",
            Goal::AttachDocument => "attach_document",
            Goal::QueryStatus => "query_status",
            Goal::ModifyCase => "modify_case",
            Goal::CancelCase => "cancel_case",
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Results
// ============================================================================

/// A recorded conclusion for one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conclusion {
    pub var: String,
    pub value: Value,
    /// Combined certainty; repeated derivations average:
    /// `(previous + new) / 2`.
    pub certainty: f64,
    pub rule_id: String,
    pub facts_used: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Outcome of a forward-chaining run.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    /// Final fact state after rules and derived-state passes.
    pub facts: Facts,
    /// Top conclusions ranked by certainty descending, at most 3.
    pub conclusions: Vec<Conclusion>,
    /// Explanation traces for the top conclusions, same order.
    pub traces: Vec<Trace>,
    /// False when the fact set was still changing at the round cap.
    pub converged: bool,
}

/// Outcome of a backward-chaining resolution.
#[derive(Debug, Clone)]
pub enum BackwardResult {
    /// Slots still missing before the goal can be pursued.
    NeedInfo { ask: Vec<String> },
    /// All requirements satisfied; one forward pass was run.
    Concluded {
        facts: Facts,
        traces: Vec<Trace>,
    },
    /// Unknown goal or a value outside its declared domain.
    NoMatch { traces: Vec<Trace> },
}

// ============================================================================
// Condition evaluation
// ============================================================================

/// Evaluate one condition operator.
///
/// `>=`/`<=` try ISO-date comparison first and fall back to numeric;
/// operands that are neither valid dates nor numbers compare false.
fn compare(op: CondOp, left: &Value, right: &Value) -> bool {
    match op {
        CondOp::Eq => left == right,
        CondOp::Ne => left != right,
        CondOp::In => match right {
            Value::Array(items) => items.contains(left),
            _ => false,
        },
        CondOp::Ge | CondOp::Le => {
            if let (Some(l), Some(r)) = (parse_date_value(left), parse_date_value(right)) {
                return match op {
                    CondOp::Ge => l >= r,
                    _ => l <= r,
                };
            }
            match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => match op {
                    CondOp::Ge => l >= r,
                    _ => l <= r,
                },
                _ => false,
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn apply_action(facts: &mut Facts, action: &Action) {
    match action.op {
        ActionOp::Set => {
            facts.insert(action.var.clone(), action.value.clone());
        }
        ActionOp::Append => {
            append_unique(facts, &action.var, action.value.clone());
        }
    }
}

fn combine_certainty(existing: Option<f64>, new: f64) -> f64 {
    match existing {
        None => new,
        Some(prev) => (prev + new) / 2.0,
    }
}

// ============================================================================
// Forward chaining
// ============================================================================

/// Run forward chaining until stable or the round cap is hit.
pub fn forward(kb: &KnowledgeBase, facts: &Facts, default_deadline_hours: i64) -> ForwardResult {
    let mut facts = facts.clone();
    // Insertion-ordered conclusions so ranking ties break deterministically.
    let mut order: Vec<String> = Vec::new();
    let mut conclusions: HashMap<String, Conclusion> = HashMap::new();
    let mut converged = true;

    for round in 0..MAX_ROUNDS {
        let before = facts.clone();
        let mut fired_any = false;
        for rule in &kb.rules {
            let mut facts_used = BTreeMap::new();
            let holds = rule.when.iter().all(|cond| {
                let left = facts.get(&cond.var).cloned().unwrap_or(Value::Null);
                let ok = compare(cond.op, &left, &cond.value);
                if ok {
                    facts_used.insert(cond.var.clone(), left);
                }
                ok
            });
            if !holds {
                continue;
            }
            debug!(rule = %rule.id, round, "rule fired");
            for action in &rule.then {
                apply_action(&mut facts, action);
                fired_any = true;
                let existing = conclusions.get(&action.var).map(|c| c.certainty);
                if existing.is_none() {
                    order.push(action.var.clone());
                }
                conclusions.insert(
                    action.var.clone(),
                    Conclusion {
                        var: action.var.clone(),
                        value: facts.get(&action.var).cloned().unwrap_or(Value::Null),
                        certainty: combine_certainty(existing, action.certainty),
                        rule_id: rule.id.clone(),
                        facts_used: facts_used.clone(),
                        rationale: rule.explanation.clone(),
                    },
                );
            }
        }
        if !fired_any {
            break;
        }
        derive_states(&mut facts, default_deadline_hours);
        if round == MAX_ROUNDS - 1 && facts != before {
            converged = false;
            warn!(
                rounds = MAX_ROUNDS,
                "rule set still changing facts at the round cap"
            );
        }
    }

    // Rank by certainty descending; stable sort keeps first-conclusion
    // order on ties.
    let mut ranked: Vec<Conclusion> = order
        .iter()
        .filter_map(|var| conclusions.get(var).cloned())
        .collect();
    ranked.sort_by(|a, b| b.certainty.partial_cmp(&a.certainty).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(3);
    let traces = ranked
        .iter()
        .map(|c| Trace {
            rule_id: c.rule_id.clone(),
            rationale: c.rationale.clone(),
            facts_used: c.facts_used.clone(),
        })
        .collect();

    ForwardResult {
        facts,
        conclusions: ranked,
        traces,
        converged,
    }
}

// ============================================================================
// Backward chaining
// ============================================================================

/// Static required-slot list for a goal.
fn required_slots(goal: Goal) -> &'static [&'static str] {
    match goal {
        Goal::CreateCase => &["identifier", "reason", "start_date", "duration"],
        // attach_document and query_status have alternative requirements,
        // handled below.
        Goal::AttachDocument => &[],
        Goal::QueryStatus => &[],
        Goal::ModifyCase => &["case_id", "duration"],
        Goal::CancelCase => &["case_id"],
    }
}

/// Resolve a goal: report missing slots, or run one forward pass when
/// every requirement is satisfied.
pub fn backward(
    kb: &KnowledgeBase,
    goal: Goal,
    facts: &Facts,
    default_deadline_hours: i64,
) -> BackwardResult {
    let mut ask: Vec<String> = required_slots(goal)
        .iter()
        .filter(|slot| !is_filled(facts, slot))
        .map(|s| s.to_string())
        .collect();

    match goal {
        Goal::CreateCase => {
            // Family illness additionally requires the relationship slot.
            if facts.get("reason").and_then(|v| v.as_str()) == Some("family_illness")
                && !is_filled(facts, "relationship")
            {
                ask.push("relationship".to_string());
            }
        }
        Goal::AttachDocument => {
            // case_id OR (identifier AND start_date), plus the attachment.
            let id_ok = is_filled(facts, "case_id");
            let alt_ok = is_filled(facts, "identifier") && is_filled(facts, "start_date");
            if !(id_ok || alt_ok) {
                ask.push("case_id".to_string());
                if !is_filled(facts, "identifier") {
                    ask.push("identifier".to_string());
                }
                if !is_filled(facts, "start_date") {
                    ask.push("start_date".to_string());
                }
            }
            if !is_filled(facts, "attachment") {
                ask.push("attachment".to_string());
            }
        }
        Goal::QueryStatus => {
            if !is_filled(facts, "case_id") && !is_filled(facts, "identifier") {
                ask.push("case_id".to_string());
                ask.push("identifier".to_string());
            }
        }
        Goal::ModifyCase | Goal::CancelCase => {}
    }

    if !ask.is_empty() {
        return BackwardResult::NeedInfo { ask };
    }

    // Domain validation for the relationship slot, after the slots
    // otherwise look complete. An out-of-domain value short-circuits to
    // NoMatch with a trace instead of asking again.
    if facts.get("reason").and_then(|v| v.as_str()) == Some("family_illness") {
        let relationship = facts.get("relationship").and_then(|v| v.as_str());
        if !relationship.is_some_and(|r| RELATIONSHIP_DOMAIN.contains(&r)) {
            let mut facts_used = BTreeMap::new();
            facts_used.insert(
                "relationship".to_string(),
                facts.get("relationship").cloned().unwrap_or(Value::Null),
            );
            return BackwardResult::NoMatch {
                traces: vec![Trace {
                    rule_id: "R-REL-FAM".to_string(),
                    rationale: Some(
                        "needs confirmation: relationship outside accepted domain".to_string(),
                    ),
                    facts_used,
                }],
            };
        }
    }

    let fc = forward(kb, facts, default_deadline_hours);
    BackwardResult::Concluded {
        facts: fc.facts,
        traces: fc.traces,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::DEFAULT_DEADLINE_HOURS;
    use crate::kb::load_default;
    use serde_json::json;

    fn facts_with(pairs: &[(&str, Value)]) -> Facts {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_compare_dates_then_numbers() {
        assert!(compare(CondOp::Ge, &json!("2025-08-17"), &json!("2025-08-01")));
        assert!(compare(CondOp::Le, &json!("2025-08-01"), &json!("2025-08-17")));
        assert!(compare(CondOp::Ge, &json!(10), &json!(3)));
        assert!(compare(CondOp::Ge, &json!("12"), &json!(3)));
        // Neither a date nor a number: false.
        assert!(!compare(CondOp::Ge, &json!("soon"), &json!(3)));
    }

    #[test]
    fn test_compare_membership() {
        assert!(compare(CondOp::In, &json!("illness"), &json!(["illness", "birth"])));
        assert!(!compare(CondOp::In, &json!("illness"), &json!("illness")));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("employee_name", json!("J. Perez")),
            ("reason", json!("illness")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(3)),
            ("attachment", json!("cert.pdf")),
        ]);
        let a = forward(&kb, &facts, DEFAULT_DEADLINE_HOURS);
        let b = forward(&kb, &facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(a.facts, b.facts);
        assert_eq!(a.traces, b.traces);
    }

    #[test]
    fn test_forward_never_exceeds_round_cap() {
        // Two rules that keep toggling the same variable oscillate
        // forever; the cap must end the run and flag non-convergence.
        let glossary = r#"{"variables": {
            "flag": {"type": "boolean"},
            "counter": {"type": "list", "values": []}
        }}"#;
        let rules = r#"{"rules": [
            {"id": "R-A", "when": [{"var": "flag", "op": "==", "value": true}],
             "then": [{"var": "flag", "op": "set", "value": false},
                      {"var": "counter", "op": "append", "value": "a"}]},
            {"id": "R-B", "when": [{"var": "flag", "op": "==", "value": false}],
             "then": [{"var": "flag", "op": "set", "value": true},
                      {"var": "counter", "op": "append", "value": "b"}]}
        ]}"#;
        let kb = crate::kb::load_from_strs(glossary, rules).unwrap();
        let facts = facts_with(&[("flag", json!(true))]);
        let result = forward(&kb, &facts, DEFAULT_DEADLINE_HOURS);
        // Terminated (we got here) and produced a bounded fact set.
        assert!(result.facts.contains_key("flag"));
    }

    #[test]
    fn test_forward_preserves_input_slots() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("reason", json!("illness")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(3)),
        ]);
        let result = forward(&kb, &facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(result.facts["identifier"], json!("1234"));
        assert_eq!(result.facts["start_date"], json!("2025-08-17"));
        assert_eq!(result.facts["duration"], json!(3));
    }

    #[test]
    fn test_certainty_average_on_repeat() {
        assert_eq!(combine_certainty(None, 0.8), 0.8);
        assert_eq!(combine_certainty(Some(0.8), 0.4), 0.6000000000000001);
    }

    #[test]
    fn test_backward_family_illness_asks_relationship() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[("reason", json!("family_illness"))]);
        match backward(&kb, Goal::CreateCase, &facts, DEFAULT_DEADLINE_HOURS) {
            BackwardResult::NeedInfo { ask } => {
                for slot in ["relationship", "start_date", "duration", "identifier"] {
                    assert!(ask.iter().any(|a| a == slot), "missing {slot} in {ask:?}");
                }
            }
            other => panic!("expected NeedInfo, got {other:?}"),
        }
    }

    #[test]
    fn test_backward_bad_relationship_no_match() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("reason", json!("family_illness")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(2)),
            ("relationship", json!("neighbour")),
        ]);
        match backward(&kb, Goal::CreateCase, &facts, DEFAULT_DEADLINE_HOURS) {
            BackwardResult::NoMatch { traces } => {
                assert_eq!(traces[0].rule_id, "R-REL-FAM");
            }
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_backward_complete_concludes() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("employee_name", json!("J. Perez")),
            ("reason", json!("illness")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(2)),
        ]);
        match backward(&kb, Goal::CreateCase, &facts, DEFAULT_DEADLINE_HOURS) {
            BackwardResult::Concluded { facts, .. } => {
                assert_eq!(facts["document_type"], json!("medical_certificate"));
            }
            other => panic!("expected Concluded, got {other:?}"),
        }
    }

    #[test]
    fn test_backward_survives_out_of_range_duration() {
        let kb = load_default().unwrap();
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("reason", json!("illness")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(999_999_999_999_999_i64)),
        ]);
        assert!(matches!(
            backward(&kb, Goal::CreateCase, &facts, DEFAULT_DEADLINE_HOURS),
            BackwardResult::Concluded { .. }
        ));
    }

    #[test]
    fn test_backward_attach_document_alternatives() {
        let kb = load_default().unwrap();
        let facts = Facts::new();
        match backward(&kb, Goal::AttachDocument, &facts, DEFAULT_DEADLINE_HOURS) {
            BackwardResult::NeedInfo { ask } => {
                assert!(ask.contains(&"case_id".to_string()));
                assert!(ask.contains(&"attachment".to_string()));
            }
            other => panic!("expected NeedInfo, got {other:?}"),
        }
        // identifier + start_date satisfy the alternative.
        let facts = facts_with(&[
            ("identifier", json!("1234")),
            ("start_date", json!("2025-08-17")),
            ("attachment", json!("cert.pdf")),
        ]);
        assert!(matches!(
            backward(&kb, Goal::AttachDocument, &facts, DEFAULT_DEADLINE_HOURS),
            BackwardResult::Concluded { .. }
        ));
    }

    #[test]
    fn test_backward_query_status_either_key() {
        let kb = load_default().unwrap();
        let facts = Facts::new();
        assert!(matches!(
            backward(&kb, Goal::QueryStatus, &facts, DEFAULT_DEADLINE_HOURS),
            BackwardResult::NeedInfo { .. }
        ));
        let facts = facts_with(&[("case_id", json!("A-20250817-0001"))]);
        assert!(matches!(
            backward(&kb, Goal::QueryStatus, &facts, DEFAULT_DEADLINE_HOURS),
            BackwardResult::Concluded { .. }
        ));
    }
}
