//! Fact store - everything known about one case being built.
//!
//! Facts are a flat mapping from variable name to JSON value (string,
//! integer, ISO date string, boolean, or list). Variable names are not
//! namespaced; types are declared once, globally, in the glossary and
//! enforced at knowledge-base validation time, not per write.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;

/// Mutable fact mapping for one in-progress case.
pub type Facts = HashMap<String, Value>;

/// Read a fact as a string slice.
pub fn fact_str<'a>(facts: &'a Facts, name: &str) -> Option<&'a str> {
    facts.get(name).and_then(|v| v.as_str())
}

/// Read a fact as an integer.
pub fn fact_i64(facts: &Facts, name: &str) -> Option<i64> {
    facts.get(name).and_then(|v| v.as_i64())
}

/// Read a fact as a boolean.
pub fn fact_bool(facts: &Facts, name: &str) -> Option<bool> {
    facts.get(name).and_then(|v| v.as_bool())
}

/// Read a fact as an ISO calendar date.
pub fn fact_date(facts: &Facts, name: &str) -> Option<NaiveDate> {
    facts.get(name).and_then(parse_date_value)
}

/// Parse a JSON value as an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Whether a slot counts as filled: present, non-null, and not an
/// empty string.
pub fn is_filled(facts: &Facts, name: &str) -> bool {
    match facts.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Append a value to a list-valued fact, skipping duplicates.
///
/// A missing fact becomes a one-element list; a scalar fact is promoted
/// to a list before appending.
pub fn append_unique(facts: &mut Facts, name: &str, value: Value) {
    match facts.get_mut(name) {
        None | Some(Value::Null) => {
            facts.insert(name.to_string(), Value::Array(vec![value]));
        }
        Some(Value::Array(items)) => {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        Some(current) => {
            let current = current.clone();
            let promoted = if current == value {
                vec![current]
            } else {
                vec![current, value]
            };
            facts.insert(name.to_string(), Value::Array(promoted));
        }
    }
}
