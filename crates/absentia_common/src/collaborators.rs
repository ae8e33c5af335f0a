//! Collaborator contracts consumed by the dialogue core.
//!
//! The core issues these calls but does not care who implements them:
//! an employee directory for the identity gate, a case repository for
//! persistence, and a shared identifier store keyed by conversation id.
//! In-memory implementations live here (used by tests and as defaults);
//! the SQLite-backed ones are in `sqlite_store`.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AbsentiaError;
use crate::facts::{fact_date, fact_i64, fact_str, Facts};

// ============================================================================
// Contracts
// ============================================================================

/// Identity lookup for the gate.
pub trait EmployeeDirectory: Send + Sync {
    /// Whether a 4-digit identifier belongs to a known employee.
    fn validate(&self, identifier: &str) -> Result<bool, AbsentiaError>;

    /// Employee name for a validated identifier, when known.
    fn name_of(&self, identifier: &str) -> Result<Option<String>, AbsentiaError> {
        let _ = identifier;
        Ok(None)
    }
}

/// A freshly persisted case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedCase {
    pub case_id: String,
}

/// Certificate metadata for an update.
#[derive(Debug, Clone, Default)]
pub struct CertificateUpdate {
    pub file_name: Option<String>,
    pub document_type: Option<String>,
    pub legible: Option<bool>,
    pub receipt_date: Option<NaiveDate>,
    pub deadline_hours: Option<i64>,
}

/// Resulting states after a certificate update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateOutcome {
    pub case_status: String,
    pub certificate_status: String,
    pub past_deadline: bool,
}

/// One row of an employee's case history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    pub case_id: String,
    pub reason: String,
    pub start_date: String,
    pub duration: i64,
    pub case_status: Option<String>,
    pub certificate_status: Option<String>,
}

/// Case persistence.
pub trait CaseRepository: Send + Sync {
    /// Persist a case built from facts. Fails with `Persistence` when a
    /// required field is missing or the date range overlaps an existing
    /// case for the same identifier.
    fn create_case(&self, facts: &Facts) -> Result<CreatedCase, AbsentiaError>;

    /// Attach/refresh certificate metadata on an existing case and
    /// re-derive its certificate and case status.
    fn update_certificate(
        &self,
        case_id: &str,
        update: &CertificateUpdate,
    ) -> Result<CertificateOutcome, AbsentiaError>;

    /// Most recent cases for an identifier, newest first.
    fn history(&self, identifier: &str, limit: usize) -> Result<Vec<CaseSummary>, AbsentiaError>;
}

/// Shared identifier store keyed by conversation id, so later sessions
/// on the same key skip the identity gate.
pub trait IdentifierStore: Send + Sync {
    fn set_identifier(&self, session_key: &str, identifier: &str);
    fn get_identifier(&self, session_key: &str) -> Option<String>;
}

// ============================================================================
// Helpers shared by implementations
// ============================================================================

/// Fields `create_case` refuses to persist without.
pub const REQUIRED_CASE_FIELDS: [&str; 4] = ["identifier", "reason", "start_date", "duration"];

pub(crate) struct CaseFields {
    pub identifier: String,
    pub reason: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration: i64,
}

pub(crate) fn case_fields(facts: &Facts) -> Result<CaseFields, AbsentiaError> {
    let missing: Vec<&str> = REQUIRED_CASE_FIELDS
        .iter()
        .filter(|f| !crate::facts::is_filled(facts, f))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AbsentiaError::persistence(format!(
            "missing fields: {missing:?}"
        )));
    }
    let start_date = fact_date(facts, "start_date")
        .ok_or_else(|| AbsentiaError::persistence("start_date is not a valid ISO date"))?;
    let duration = fact_i64(facts, "duration")
        .ok_or_else(|| AbsentiaError::persistence("duration is not an integer"))?;
    let end_date = Duration::try_days(duration)
        .and_then(|d| start_date.checked_add_signed(d))
        .ok_or_else(|| AbsentiaError::persistence("duration is out of range"))?;
    Ok(CaseFields {
        identifier: fact_str(facts, "identifier").unwrap_or_default().to_string(),
        reason: fact_str(facts, "reason").unwrap_or_default().to_string(),
        start_date,
        end_date,
        duration,
    })
}

/// `A-YYYYMMDD-NNNN`, sequential within the start day.
pub(crate) fn format_case_id(start_date: NaiveDate, seq: usize) -> String {
    format!("A-{}-{:04}", start_date.format("%Y%m%d"), seq)
}

pub(crate) fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    !(a_end < b_start || a_start > b_end)
}

/// Certificate status from attachment + legibility, shared with the
/// repository implementations.
pub(crate) fn certificate_status(attached: bool, legible: Option<bool>) -> &'static str {
    if attached {
        match legible {
            Some(false) => "pending_review",
            _ => "validated",
        }
    } else {
        "pending"
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Directory backed by a fixed identifier -> name table.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    employees: HashMap<String, String>,
}

impl InMemoryDirectory {
    pub fn with_employees(entries: &[(&str, &str)]) -> Self {
        InMemoryDirectory {
            employees: entries
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        }
    }
}

impl EmployeeDirectory for InMemoryDirectory {
    fn validate(&self, identifier: &str) -> Result<bool, AbsentiaError> {
        Ok(self.employees.contains_key(identifier))
    }

    fn name_of(&self, identifier: &str) -> Result<Option<String>, AbsentiaError> {
        Ok(self.employees.get(identifier).cloned())
    }
}

#[derive(Debug, Clone)]
struct StoredCase {
    case_id: String,
    identifier: String,
    reason: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    duration: i64,
    document_type: Option<String>,
    case_status: Option<String>,
    certificate_status: Option<String>,
    attached: bool,
    legible: Option<bool>,
    receipt_date: Option<NaiveDate>,
}

/// Case repository backed by a `Vec` behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryCaseRepository {
    cases: Mutex<Vec<StoredCase>>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaseRepository for InMemoryCaseRepository {
    fn create_case(&self, facts: &Facts) -> Result<CreatedCase, AbsentiaError> {
        let fields = case_fields(facts)?;
        let mut cases = self.cases.lock().expect("case store poisoned");
        let overlap = cases.iter().any(|c| {
            c.identifier == fields.identifier
                && ranges_overlap(fields.start_date, fields.end_date, c.start_date, c.end_date)
        });
        if overlap {
            return Err(AbsentiaError::persistence("overlapping case detected"));
        }
        let prefix = format!("A-{}-", fields.start_date.format("%Y%m%d"));
        let seq = cases
            .iter()
            .filter(|c| c.case_id.starts_with(&prefix))
            .count()
            + 1;
        let case_id = format_case_id(fields.start_date, seq);
        cases.push(StoredCase {
            case_id: case_id.clone(),
            identifier: fields.identifier,
            reason: fields.reason,
            start_date: fields.start_date,
            end_date: fields.end_date,
            duration: fields.duration,
            document_type: fact_str(facts, "document_type").map(str::to_string),
            case_status: fact_str(facts, "case_status").map(str::to_string),
            certificate_status: fact_str(facts, "certificate_status").map(str::to_string),
            attached: crate::facts::is_filled(facts, "attachment"),
            legible: None,
            receipt_date: None,
        });
        Ok(CreatedCase { case_id })
    }

    fn update_certificate(
        &self,
        case_id: &str,
        update: &CertificateUpdate,
    ) -> Result<CertificateOutcome, AbsentiaError> {
        let mut cases = self.cases.lock().expect("case store poisoned");
        let case = cases
            .iter_mut()
            .find(|c| c.case_id == case_id)
            .ok_or_else(|| AbsentiaError::persistence(format!("unknown case id {case_id}")))?;
        if let Some(file_name) = &update.file_name {
            case.attached = !file_name.is_empty();
        }
        if let Some(doc) = &update.document_type {
            case.document_type = Some(doc.clone());
        }
        if update.legible.is_some() {
            case.legible = update.legible;
        }
        if update.receipt_date.is_some() {
            case.receipt_date = update.receipt_date;
        }
        let cert_status = certificate_status(case.attached, case.legible);
        case.certificate_status = Some(cert_status.to_string());
        let deadline = update.deadline_hours.unwrap_or(48);
        let past_deadline = match case.receipt_date {
            Some(receipt) => (receipt - case.start_date).num_hours() > deadline,
            None => false,
        };
        let requires_doc = case.document_type.is_some();
        let case_status = if !requires_doc || cert_status == "validated" {
            "complete"
        } else {
            "incomplete"
        };
        case.case_status = Some(case_status.to_string());
        Ok(CertificateOutcome {
            case_status: case_status.to_string(),
            certificate_status: cert_status.to_string(),
            past_deadline,
        })
    }

    fn history(&self, identifier: &str, limit: usize) -> Result<Vec<CaseSummary>, AbsentiaError> {
        let cases = self.cases.lock().expect("case store poisoned");
        Ok(cases
            .iter()
            .rev()
            .filter(|c| c.identifier == identifier)
            .take(limit)
            .map(|c| CaseSummary {
                case_id: c.case_id.clone(),
                reason: c.reason.clone(),
                start_date: c.start_date.format("%Y-%m-%d").to_string(),
                duration: c.duration,
                case_status: c.case_status.clone(),
                certificate_status: c.certificate_status.clone(),
            })
            .collect())
    }
}

/// In-process identifier store.
#[derive(Debug, Default)]
pub struct InMemoryIdentifierStore {
    by_session: Mutex<HashMap<String, String>>,
}

impl InMemoryIdentifierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierStore for InMemoryIdentifierStore {
    fn set_identifier(&self, session_key: &str, identifier: &str) {
        self.by_session
            .lock()
            .expect("identifier store poisoned")
            .insert(session_key.to_string(), identifier.to_string());
    }

    fn get_identifier(&self, session_key: &str) -> Option<String> {
        self.by_session
            .lock()
            .expect("identifier store poisoned")
            .get(session_key)
            .cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================
