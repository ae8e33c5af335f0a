//! Text normalization - fixed keyword/pattern fact extraction.
//!
//! Everything here is deliberately dumb: regular expressions and closed
//! keyword tables, no NLU. Parse failures return `None` and the dialogue
//! layer re-prompts the same slot.

use chrono::{Duration, Local, NaiveDate};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

use crate::facts::Facts;

/// Trim + lowercase.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-zA-Z_]+)\s*:\s*([^\n;]+)").unwrap())
}

fn slash_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap())
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn xnd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"x(\d+)d\b").unwrap())
}

fn day_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*days?\b").unwrap())
}

fn bare_integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)$").unwrap())
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:identifier|id)\b[^\d]{0,10}(\d{4})\b").unwrap())
}

fn any_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2}/\d{1,2}/\d{4})").unwrap())
}

// ============================================================================
// Slot parsers
// ============================================================================

/// Parse a date expression to ISO `YYYY-MM-DD`.
///
/// Accepts the keywords today/tomorrow/yesterday, ISO dates, and
/// `DD/MM/YYYY`. Invalid calendar dates yield `None`.
pub fn parse_date(value: &str) -> Option<String> {
    parse_date_with(value, Local::now().date_naive())
}

/// `parse_date` with an explicit "today", for tests.
pub fn parse_date_with(value: &str, today: NaiveDate) -> Option<String> {
    let text = normalize_text(value);
    match text.as_str() {
        "today" => return Some(today.format("%Y-%m-%d").to_string()),
        "tomorrow" => return Some((today + Duration::days(1)).format("%Y-%m-%d").to_string()),
        "yesterday" => return Some((today - Duration::days(1)).format("%Y-%m-%d").to_string()),
        _ => {}
    }
    if iso_date_re().is_match(&text) {
        // Validate the calendar date, not just the shape.
        return NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string());
    }
    if let Some(caps) = slash_date_re().captures(&text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string());
    }
    None
}

const NUMBER_WORDS: [(&str, i64); 10] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

/// Upper bound on a plausible absence length, in days. Anything above
/// counts as a parse failure so the dialogue re-prompts.
const MAX_DAY_COUNT: i64 = 365;

/// Extract an estimated day count: `x3d`, `3 days`, a bare integer, or a
/// small number word. A numeral inside unrelated text (a date, a case id)
/// is not a count. Zero and implausibly large counts fail to parse.
pub fn parse_day_count(value: &str) -> Option<i64> {
    let text = normalize_text(value);
    let days = if let Some(caps) = xnd_re().captures(&text) {
        caps[1].parse().ok()
    } else if let Some(caps) = day_phrase_re().captures(&text) {
        caps[1].parse().ok()
    } else if let Some(caps) = bare_integer_re().captures(&text) {
        caps[1].parse().ok()
    } else {
        NUMBER_WORDS
            .iter()
            .find(|(word, _)| *word == text)
            .map(|(_, n)| *n)
    }?;
    (1..=MAX_DAY_COUNT).contains(&days).then_some(days)
}

/// Extract a 4-digit employee identifier.
///
/// Matches the whole text being 4 digits, or `identifier: 1234` /
/// "my id is 1234" phrasings. A 4-digit numeral inside other text does
/// NOT match; that keeps day-count answers unambiguous.
pub fn parse_identifier(text: &str) -> Option<String> {
    let content = normalize_text(text);
    static FULL: OnceLock<Regex> = OnceLock::new();
    let full = FULL.get_or_init(|| Regex::new(r"^\d{4}$").unwrap());
    if full.is_match(&content) {
        return Some(content);
    }
    identifier_re()
        .captures(&content)
        .map(|caps| caps[1].to_string())
}

const REASONS: [&str; 8] = [
    "occupational_accident",
    "illness",
    "family_illness",
    "bereavement",
    "marriage",
    "birth",
    "paternity",
    "union_leave",
];

const REASON_SYNONYMS: [(&str, &str); 6] = [
    ("sick", "illness"),
    ("sick leave", "illness"),
    ("medical leave", "illness"),
    ("flu", "illness"),
    ("accident at work", "occupational_accident"),
    ("funeral", "bereavement"),
];

/// Normalize a reason expression to the glossary domain, or `None`.
pub fn normalize_reason(value: &str) -> Option<String> {
    let text = normalize_text(value);
    let candidate = text.replace(' ', "_");
    if REASONS.contains(&candidate.as_str()) {
        return Some(candidate);
    }
    REASON_SYNONYMS
        .iter()
        .find(|(syn, _)| *syn == text)
        .map(|(_, canonical)| canonical.to_string())
}

// ============================================================================
// Free-text fact extraction
// ============================================================================

const KNOWN_VARS: [&str; 7] = [
    "identifier",
    "reason",
    "start_date",
    "duration",
    "relationship",
    "case_id",
    "attachment",
];

/// Extract facts from free-form input.
///
/// - `var: value` pairs for the known slot names
/// - the phrase "getting married" sets the marriage reason (and a date
///   in the same message, when present)
/// - a bare 4-digit numeral maps to `identifier`, never to `duration`
/// - day counts are only picked up when a day hint is present
pub fn extract_pairs(text: &str) -> Facts {
    let mut result = Facts::new();
    for caps in pair_re().captures_iter(text) {
        let var = normalize_text(&caps[1]);
        if !KNOWN_VARS.contains(&var.as_str()) {
            continue;
        }
        let value = caps[2].trim();
        match var.as_str() {
            "reason" => {
                if let Some(reason) = normalize_reason(value) {
                    result.insert("reason".to_string(), json!(reason));
                }
            }
            "start_date" => {
                if let Some(date) = parse_date(value) {
                    result.insert("start_date".to_string(), json!(date));
                }
            }
            "duration" => {
                if let Some(days) = parse_day_count(value) {
                    result.insert("duration".to_string(), json!(days));
                }
            }
            // identifier, case_id, attachment: stored raw.
            other => {
                result.insert(other.to_string(), json!(value));
            }
        }
    }

    let flat = normalize_text(text);
    if flat.contains("getting married") {
        result
            .entry("reason".to_string())
            .or_insert_with(|| json!("marriage"));
        if let Some(caps) = any_date_re().captures(&flat) {
            if let Some(date) = parse_date(&caps[1]) {
                result
                    .entry("start_date".to_string())
                    .or_insert_with(|| json!(date));
            }
        }
    }

    // A lone 4-digit numeral is an identifier candidate, never a day
    // count. Checked before the day-count extraction on purpose.
    if !result.contains_key("identifier") {
        if let Some(identifier) = parse_identifier(text) {
            result.insert("identifier".to_string(), json!(identifier));
        }
    }

    if !result.contains_key("duration") {
        let has_day_hint = xnd_re().is_match(&flat)
            || ["day", "days", "duration"]
                .iter()
                .any(|hint| flat.contains(hint));
        if has_day_hint {
            if let Some(days) = parse_day_count(&flat) {
                result.insert("duration".to_string(), json!(days));
            }
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
