//! Knowledge base loader and validator.
//!
//! Two declarative JSON documents drive the engine: a glossary (variable
//! name -> type, with the allowed value set for enums and lists) and a
//! rule set (ordered condition -> action rules). Both are validated in
//! full before any inference runs; a structurally invalid document is a
//! fatal `Validation` error and the process must not start with it.
//!
//! The default documents are embedded in the binary; `load_from_paths`
//! reads external ones. Loading is idempotent and the returned structure
//! is immutable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::error::AbsentiaError;

const DEFAULT_GLOSSARY: &str = include_str!("../kb/glossary.json");
const DEFAULT_RULES: &str = include_str!("../kb/rules.json");

// ============================================================================
// Document structures
// ============================================================================

/// Declared type of a glossary variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Int,
    Date,
    Enum,
    Boolean,
    List,
}

/// One glossary entry: a variable's type and, for enums and lists, its
/// closed set of allowed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarSpec {
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

/// The variable catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Glossary {
    #[serde(default)]
    pub version: u32,
    pub variables: HashMap<String, VarSpec>,
}

impl Glossary {
    /// Allowed string values for an enum/list variable, empty when the
    /// variable is unknown or unconstrained.
    pub fn values_of(&self, var: &str) -> Vec<String> {
        self.variables
            .get(var)
            .and_then(|spec| spec.values.as_ref())
            .map(|vals| {
                vals.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Condition operator, `when` side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

/// Action operation, `then` side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOp {
    Set,
    Append,
}

/// A single condition: variable `op` comparison-value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub var: String,
    pub op: CondOp,
    #[serde(default)]
    pub value: Value,
}

/// A single action applied when the owning rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub var: String,
    pub op: ActionOp,
    #[serde(default)]
    pub value: Value,
    /// Certainty attached to the conclusion, defaults to 1.0.
    #[serde(default = "default_certainty")]
    pub certainty: f64,
}

fn default_certainty() -> f64 {
    1.0
}

/// One declarative rule: all conditions must hold for the actions to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub when: Vec<Condition>,
    pub then: Vec<Action>,
    /// Human-readable rationale, carried into explanation traces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleDocument {
    #[serde(default = "default_version")]
    version: u32,
    rules: Vec<Rule>,
}

fn default_version() -> u32 {
    1
}

/// Validated, immutable knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub glossary: Glossary,
    pub rules: Vec<Rule>,
    pub version: u32,
}

// ============================================================================
// Loading and validation
// ============================================================================

/// Load the embedded default documents.
pub fn load_default() -> Result<KnowledgeBase, AbsentiaError> {
    load_from_strs(DEFAULT_GLOSSARY, DEFAULT_RULES)
}

/// Load glossary and rules from external files.
pub fn load_from_paths(
    glossary_path: &Path,
    rules_path: &Path,
) -> Result<KnowledgeBase, AbsentiaError> {
    let glossary = std::fs::read_to_string(glossary_path)?;
    let rules = std::fs::read_to_string(rules_path)?;
    load_from_strs(&glossary, &rules)
}

/// Parse and validate both documents from raw JSON text.
pub fn load_from_strs(glossary_json: &str, rules_json: &str) -> Result<KnowledgeBase, AbsentiaError> {
    let glossary_value: Value = serde_json::from_str(glossary_json)?;
    if glossary_value.get("variables").is_none() {
        return Err(AbsentiaError::validation(
            "glossary is missing the 'variables' catalogue",
        ));
    }
    let glossary: Glossary = serde_json::from_value(glossary_value)
        .map_err(|e| AbsentiaError::validation(format!("glossary: {e}")))?;
    validate_glossary(&glossary)?;

    let rules_value: Value = serde_json::from_str(rules_json)?;
    if rules_value.get("rules").is_none() {
        return Err(AbsentiaError::validation("rule document is missing 'rules'"));
    }
    let doc: RuleDocument = serde_json::from_value(rules_value)
        .map_err(|e| AbsentiaError::validation(format!("rules: {e}")))?;
    validate_rules(&doc.rules, &glossary)?;

    Ok(KnowledgeBase {
        glossary,
        rules: doc.rules,
        version: doc.version,
    })
}

fn validate_glossary(glossary: &Glossary) -> Result<(), AbsentiaError> {
    for (name, spec) in &glossary.variables {
        match spec.var_type {
            VarType::Enum | VarType::List => {
                if spec.values.is_none() {
                    return Err(AbsentiaError::validation(format!(
                        "variable '{name}' is {:?}-typed but declares no 'values'",
                        spec.var_type
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_rules(rules: &[Rule], glossary: &Glossary) -> Result<(), AbsentiaError> {
    for rule in rules {
        if rule.id.is_empty() {
            return Err(AbsentiaError::validation("rule with empty id"));
        }
        for cond in &rule.when {
            if !glossary.variables.contains_key(&cond.var) {
                return Err(AbsentiaError::validation(format!(
                    "rule {}: condition references undeclared variable '{}'",
                    rule.id, cond.var
                )));
            }
        }
        for act in &rule.then {
            if !glossary.variables.contains_key(&act.var) {
                return Err(AbsentiaError::validation(format!(
                    "rule {}: action references undeclared variable '{}'",
                    rule.id, act.var
                )));
            }
            if !(0.0..=1.0).contains(&act.certainty) {
                return Err(AbsentiaError::validation(format!(
                    "rule {}: certainty {} outside [0, 1]",
                    rule.id, act.certainty
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
