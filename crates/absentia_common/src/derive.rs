//! Derived-state pass - values that are functions of several facts at once.
//!
//! Runs once after every forward-chaining round that fired at least one
//! rule. Kept out of the declarative rule set because it encodes
//! cross-field date arithmetic and range-overlap logic the condition
//! operators cannot express.

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use crate::facts::{append_unique, fact_bool, fact_date, fact_i64, fact_str, parse_date_value, Facts};

/// Default certificate deadline when the facts do not carry one.
pub const DEFAULT_DEADLINE_HOURS: i64 = 48;

/// Compute all derived facts in place.
pub fn derive_states(facts: &mut Facts, default_deadline_hours: i64) {
    derive_end_date(facts);
    derive_certificate_status(facts);
    derive_past_deadline(facts, default_deadline_hours);
    derive_overlap(facts);
    derive_case_status(facts);
}

/// `end_date_estimated = start_date + duration`, when both are present.
/// A duration the calendar cannot absorb leaves the fact unset.
fn derive_end_date(facts: &mut Facts) {
    let (Some(start), Some(days)) = (fact_date(facts, "start_date"), fact_i64(facts, "duration"))
    else {
        return;
    };
    let Some(end) = end_of_range(start, days) else {
        return;
    };
    facts.insert(
        "end_date_estimated".to_string(),
        json!(end.format("%Y-%m-%d").to_string()),
    );
}

/// `start + days` with overflow checked instead of panicking.
fn end_of_range(start: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|d| start.checked_add_signed(d))
}

/// Certificate status from (document required, attachment, legibility).
///
/// No attachment -> pending. Attachment explicitly marked illegible ->
/// pending_review. Attachment legible or with unspecified legibility ->
/// validated. Untouched when no document type is required.
fn derive_certificate_status(facts: &mut Facts) {
    if !matches!(facts.get("document_type"), Some(v) if !v.is_null()) {
        return;
    }
    let attached = matches!(facts.get("attachment"), Some(v) if !v.is_null());
    let status = if attached {
        match fact_bool(facts, "document_legible") {
            Some(false) => "pending_review",
            _ => "validated",
        }
    } else {
        "pending"
    };
    facts.insert("certificate_status".to_string(), json!(status));
}

/// `past_deadline`: elapsed hours between start and receipt exceed the
/// deadline (fact `deadline_hours`, else the configured default).
fn derive_past_deadline(facts: &mut Facts, default_deadline_hours: i64) {
    let (Some(start), Some(receipt)) = (
        fact_date(facts, "start_date"),
        fact_date(facts, "receipt_date"),
    ) else {
        return;
    };
    let deadline = fact_i64(facts, "deadline_hours").unwrap_or(default_deadline_hours);
    let elapsed_hours = (receipt - start).num_hours();
    facts.insert("past_deadline".to_string(), json!(elapsed_hours > deadline));
}

/// Duplicate detection: an open case for the same identifier whose date
/// range overlaps [start_date, start_date + duration] rejects this one
/// and notifies HR.
fn derive_overlap(facts: &mut Facts) {
    let (Some(start), Some(days)) = (fact_date(facts, "start_date"), fact_i64(facts, "duration"))
    else {
        return;
    };
    let Some(end) = end_of_range(start, days) else {
        return;
    };
    let identifier = fact_str(facts, "identifier").map(str::to_string);
    let open_cases: Vec<Value> = facts
        .get("open_cases")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for case in &open_cases {
        if case.get("identifier").and_then(|v| v.as_str()) != identifier.as_deref() {
            continue;
        }
        let (Some(other_start), Some(other_end)) = (
            case.get("start").and_then(parse_date_value),
            case.get("end").and_then(parse_date_value),
        ) else {
            continue;
        };
        if !(end < other_start || start > other_end) {
            facts.insert("case_status".to_string(), json!("rejected"));
            append_unique(facts, "notify", json!("hr"));
        }
    }
}

/// Final case status. Short-circuits when the case is already rejected
/// or pending validation. `occupational_accident` stays incomplete
/// regardless of documentation.
fn derive_case_status(facts: &mut Facts) {
    if matches!(
        fact_str(facts, "case_status"),
        Some("rejected") | Some("pending_validation")
    ) {
        return;
    }
    if fact_str(facts, "reason") == Some("occupational_accident") {
        if !matches!(facts.get("case_status"), Some(v) if !v.is_null()) {
            facts.insert("case_status".to_string(), json!("incomplete"));
        }
        return;
    }
    let requires_doc = matches!(facts.get("document_type"), Some(v) if !v.is_null());
    let status = if !requires_doc {
        "complete"
    } else if fact_str(facts, "certificate_status") == Some("validated") {
        "complete"
    } else {
        "incomplete"
    };
    facts.insert("case_status".to_string(), json!(status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts_with(pairs: &[(&str, Value)]) -> Facts {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_end_date_estimated() {
        let mut facts = facts_with(&[("start_date", json!("2025-08-17")), ("duration", json!(3))]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["end_date_estimated"], json!("2025-08-20"));
    }

    #[test]
    fn test_absurd_duration_skips_date_derivations() {
        let mut facts = facts_with(&[
            ("identifier", json!("1234")),
            ("start_date", json!("2025-08-17")),
            ("duration", json!(999_999_999_999_999_i64)),
            (
                "open_cases",
                json!([{"identifier": "1234", "start": "2025-08-16", "end": "2025-08-18"}]),
            ),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert!(!facts.contains_key("end_date_estimated"));
        assert_ne!(facts.get("case_status"), Some(&json!("rejected")));
    }

    #[test]
    fn test_certificate_pending_without_attachment() {
        let mut facts = facts_with(&[("document_type", json!("medical_certificate"))]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["certificate_status"], json!("pending"));
    }

    #[test]
    fn test_certificate_illegible_is_pending_review() {
        let mut facts = facts_with(&[
            ("document_type", json!("medical_certificate")),
            ("attachment", json!("cert.pdf")),
            ("document_legible", json!(false)),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["certificate_status"], json!("pending_review"));
    }

    #[test]
    fn test_certificate_unspecified_legibility_validates() {
        let mut facts = facts_with(&[
            ("document_type", json!("medical_certificate")),
            ("attachment", json!("cert.pdf")),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["certificate_status"], json!("validated"));
        assert_eq!(facts["case_status"], json!("complete"));
    }

    #[test]
    fn test_past_deadline_uses_default_window() {
        let mut facts = facts_with(&[
            ("start_date", json!("2025-08-01")),
            ("receipt_date", json!("2025-08-04")),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["past_deadline"], json!(true));

        let mut facts = facts_with(&[
            ("start_date", json!("2025-08-01")),
            ("receipt_date", json!("2025-08-02")),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["past_deadline"], json!(false));
    }

    #[test]
    fn test_overlap_rejects_and_notifies_hr() {
        let mut facts = facts_with(&[
            ("identifier", json!("1234")),
            ("start_date", json!("2025-08-10")),
            ("duration", json!(3)),
            (
                "open_cases",
                json!([{"identifier": "1234", "start": "2025-08-09", "end": "2025-08-11"}]),
            ),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["case_status"], json!("rejected"));
        assert_eq!(facts["notify"], json!(["hr"]));
    }

    #[test]
    fn test_overlap_other_identifier_ignored() {
        let mut facts = facts_with(&[
            ("identifier", json!("1234")),
            ("start_date", json!("2025-08-10")),
            ("duration", json!(3)),
            (
                "open_cases",
                json!([{"identifier": "9999", "start": "2025-08-09", "end": "2025-08-11"}]),
            ),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_ne!(facts.get("case_status"), Some(&json!("rejected")));
    }

    #[test]
    fn test_occupational_accident_stays_incomplete() {
        let mut facts = facts_with(&[
            ("reason", json!("occupational_accident")),
            ("attachment", json!("report.pdf")),
        ]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["case_status"], json!("incomplete"));
    }

    #[test]
    fn test_no_required_document_is_complete() {
        let mut facts = facts_with(&[("reason", json!("union_leave"))]);
        derive_states(&mut facts, DEFAULT_DEADLINE_HOURS);
        assert_eq!(facts["case_status"], json!("complete"));
    }
}
