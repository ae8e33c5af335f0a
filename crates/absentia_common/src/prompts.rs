//! Prompt texts and the slot -> prompt-builder registry.
//!
//! Adding a new slot means one registration here; the dialogue layer
//! never string-matches slot names itself.

use std::collections::HashMap;

use crate::facts::{fact_bool, fact_i64, fact_str, Facts};
use crate::kb::Glossary;

/// Builds the prompt text for one slot, given the glossary (for closed
/// value sets).
pub type PromptBuilder = fn(&Glossary) -> String;

/// Registered table mapping slot name -> prompt builder.
pub struct PromptRegistry {
    by_slot: HashMap<&'static str, PromptBuilder>,
}

impl PromptRegistry {
    /// The standard slot set.
    pub fn standard() -> Self {
        let mut registry = PromptRegistry {
            by_slot: HashMap::new(),
        };
        registry.register("identifier", prompt_identifier);
        registry.register("reason", prompt_reason);
        registry.register("start_date", prompt_start_date);
        registry.register("duration", prompt_duration);
        registry.register("relationship", prompt_relationship);
        registry.register("case_id", prompt_case_id);
        registry.register("attachment", prompt_attachment);
        registry
    }

    pub fn register(&mut self, slot: &'static str, builder: PromptBuilder) {
        self.by_slot.insert(slot, builder);
    }

    /// Prompt text for one slot, if registered.
    pub fn prompt_for(&self, slot: &str, glossary: &Glossary) -> Option<String> {
        self.by_slot.get(slot).map(|builder| builder(glossary))
    }

    /// Prompt for the first registered slot in an ask list, falling back
    /// to a generic line when none is registered.
    pub fn prompt_for_first(&self, ask: &[String], glossary: &Glossary) -> String {
        ask.iter()
            .find_map(|slot| self.prompt_for(slot, glossary))
            .unwrap_or_else(|| "I still need more details to continue.".to_string())
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Slot prompts
// ============================================================================

pub fn prompt_identifier(_: &Glossary) -> String {
    "Please give me your 4-digit employee identifier.".to_string()
}

pub fn prompt_reason(glossary: &Glossary) -> String {
    let options = glossary.values_of("reason");
    let items = options
        .iter()
        .map(|o| format!("- {o}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Pick the reason for the absence:\n{items}")
}

pub fn prompt_start_date(_: &Glossary) -> String {
    "From which date does the absence start? You can say 'today', 'tomorrow', \
     or give a date (YYYY-MM-DD / DD/MM/YYYY)."
        .to_string()
}

pub fn prompt_duration(_: &Glossary) -> String {
    "How many days do you estimate the absence will last? Give a whole number (e.g. 1, 3, 10)."
        .to_string()
}

pub fn prompt_relationship(glossary: &Glossary) -> String {
    let options = glossary.values_of("relationship").join(", ");
    format!("For a family illness, what is your relationship to the relative? ({options})")
}

pub fn prompt_case_id(_: &Glossary) -> String {
    "Tell me the case id, or your identifier and the start date so I can find it.".to_string()
}

pub fn prompt_attachment(_: &Glossary) -> String {
    "If you have the document at hand, attach it now (PDF/JPG/PNG); you can also send it later."
        .to_string()
}

pub fn prompt_certificate(document_type: Option<&str>) -> String {
    let doc = document_type.unwrap_or("certificate");
    format!(
        "A {doc} is required for this absence. Attach it when you have it (PDF/JPG/PNG)."
    )
}

// ============================================================================
// Summaries and canned messages
// ============================================================================

/// Multi-line case summary, with an optional explanation line.
pub fn summary(facts: &Facts, trace_line: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let Some(case_id) = fact_str(facts, "case_id") {
        lines.push(format!("Case id: {case_id}"));
    }
    lines.push(format!(
        "Reason: {}",
        fact_str(facts, "reason").unwrap_or("-")
    ));
    lines.push(format!(
        "Start: {}",
        fact_str(facts, "start_date").unwrap_or("-")
    ));
    lines.push(format!(
        "Days (estimated): {}",
        fact_i64(facts, "duration")
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    let deadline_flag = if fact_bool(facts, "past_deadline").unwrap_or(false) {
        " (past deadline)"
    } else {
        ""
    };
    lines.push(format!(
        "Status: {}{deadline_flag}",
        fact_str(facts, "case_status").unwrap_or("-")
    ));
    if let Some(trace) = trace_line {
        if !trace.is_empty() {
            lines.push(format!("Note: {trace}"));
        }
    }
    lines.join("\n")
}

/// One-line case summary.
pub fn short_summary(facts: &Facts) -> String {
    let deadline_flag = if fact_bool(facts, "past_deadline").unwrap_or(false) {
        " - past deadline"
    } else {
        ""
    };
    let prefix = fact_str(facts, "case_id")
        .map(|id| format!("Id: {id} - "))
        .unwrap_or_default();
    format!(
        "{prefix}Reason: {} - Start: {} - Days: {} - Status: {}{deadline_flag}",
        fact_str(facts, "reason").unwrap_or("-"),
        fact_str(facts, "start_date").unwrap_or("-"),
        fact_i64(facts, "duration")
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        fact_str(facts, "case_status").unwrap_or("-"),
    )
}

pub fn msg_confirm(summary: &str) -> String {
    format!("Shall we confirm these details?\n{summary}\nReply 'confirm' or 'edit'.")
}

pub fn msg_case_created(case_id: Option<&str>) -> String {
    match case_id {
        Some(id) => format!("Done! Case {id} has been created."),
        None => "Done! Your case has been created.".to_string(),
    }
}

pub fn msg_invalid_identifier() -> String {
    "That identifier is not in the employee directory. Please check it and try again.".to_string()
}

pub fn msg_identifier_verified(identifier: &str) -> String {
    format!("Identifier {identifier} verified.")
}

pub fn msg_edit_target() -> String {
    "What would you like to edit? Say 'reason', 'date' or 'days'.".to_string()
}

pub fn msg_error(detail: &str) -> String {
    format!("Something went wrong: {detail}. Your answers are kept; please try again.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::load_default;
    use serde_json::json;

    #[test]
    fn test_registry_covers_core_slots() {
        let kb = load_default().unwrap();
        let registry = PromptRegistry::standard();
        for slot in [
            "identifier",
            "reason",
            "start_date",
            "duration",
            "relationship",
            "case_id",
            "attachment",
        ] {
            assert!(registry.prompt_for(slot, &kb.glossary).is_some(), "{slot}");
        }
        assert!(registry.prompt_for("ghost", &kb.glossary).is_none());
    }

    #[test]
    fn test_reason_prompt_lists_domain() {
        let kb = load_default().unwrap();
        let prompt = prompt_reason(&kb.glossary);
        assert!(prompt.contains("- illness"));
        assert!(prompt.contains("- marriage"));
    }

    #[test]
    fn test_summary_includes_deadline_flag() {
        let mut facts = Facts::new();
        facts.insert("reason".into(), json!("illness"));
        facts.insert("start_date".into(), json!("2025-08-17"));
        facts.insert("duration".into(), json!(3));
        facts.insert("case_status".into(), json!("incomplete"));
        facts.insert("past_deadline".into(), json!(true));
        assert!(summary(&facts, None).contains("past deadline"));
        assert!(short_summary(&facts).contains("past deadline"));
    }
}
