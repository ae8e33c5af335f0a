//! SQLite-backed employee directory and case repository.
//!
//! One database, two tables: `employees` for the identity gate and
//! `cases` for persisted absence reports. Dates are stored as ISO
//! strings so range comparisons work lexically.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::collaborators::{
    case_fields, certificate_status, format_case_id, CaseRepository, CaseSummary,
    CertificateOutcome, CertificateUpdate, CreatedCase, EmployeeDirectory,
};
use crate::error::AbsentiaError;
use crate::facts::{fact_str, Facts};

/// SQLite store implementing both persistence collaborators.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, AbsentiaError> {
        let conn = Connection::open(path)?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, AbsentiaError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS employees (
                identifier TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cases (
                case_id TEXT PRIMARY KEY,
                identifier TEXT NOT NULL,
                reason TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                duration INTEGER NOT NULL,
                document_type TEXT,
                case_status TEXT,
                certificate_status TEXT,
                attached INTEGER NOT NULL DEFAULT 0,
                legible INTEGER,
                receipt_date TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cases_identifier ON cases(identifier);",
        )?;
        Ok(())
    }

    /// Insert employees, ignoring ones already present.
    pub fn seed_employees(&self, entries: &[(&str, &str)]) -> Result<(), AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        for (identifier, name) in entries {
            conn.execute(
                "INSERT OR IGNORE INTO employees (identifier, name) VALUES (?1, ?2)",
                params![identifier, name],
            )?;
        }
        Ok(())
    }

    /// Number of employees on file.
    pub fn employee_count(&self) -> Result<i64, AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let count = conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl EmployeeDirectory for SqliteStore {
    fn validate(&self, identifier: &str) -> Result<bool, AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let found: Option<String> = conn
            .query_row(
                "SELECT identifier FROM employees WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn name_of(&self, identifier: &str) -> Result<Option<String>, AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let name = conn
            .query_row(
                "SELECT name FROM employees WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }
}

impl CaseRepository for SqliteStore {
    fn create_case(&self, facts: &Facts) -> Result<CreatedCase, AbsentiaError> {
        let fields = case_fields(facts)?;
        let conn = self.conn.lock().expect("sqlite connection poisoned");

        let start = fields.start_date.format("%Y-%m-%d").to_string();
        let end = fields.end_date.format("%Y-%m-%d").to_string();
        let overlaps: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cases
             WHERE identifier = ?1 AND NOT (end_date < ?2 OR start_date > ?3)",
            params![fields.identifier, start, end],
            |row| row.get(0),
        )?;
        if overlaps > 0 {
            return Err(AbsentiaError::persistence("overlapping case detected"));
        }

        let prefix = format!("A-{}-", fields.start_date.format("%Y%m%d"));
        let seq: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cases WHERE case_id LIKE ?1",
            params![format!("{prefix}%")],
            |row| row.get(0),
        )?;
        let case_id = format_case_id(fields.start_date, (seq + 1) as usize);

        conn.execute(
            "INSERT INTO cases (case_id, identifier, reason, start_date, end_date, duration,
                                document_type, case_status, certificate_status, attached,
                                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                case_id,
                fields.identifier,
                fields.reason,
                start,
                end,
                fields.duration,
                fact_str(facts, "document_type"),
                fact_str(facts, "case_status"),
                fact_str(facts, "certificate_status"),
                crate::facts::is_filled(facts, "attachment") as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        info!(%case_id, identifier = %fields.identifier, "case persisted");
        Ok(CreatedCase { case_id })
    }

    fn update_certificate(
        &self,
        case_id: &str,
        update: &CertificateUpdate,
    ) -> Result<CertificateOutcome, AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let row = conn
            .query_row(
                "SELECT start_date, document_type, attached, legible, receipt_date
                 FROM cases WHERE case_id = ?1",
                params![case_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((start_date, mut document_type, attached, legible, receipt_date)) = row else {
            return Err(AbsentiaError::persistence(format!(
                "unknown case id {case_id}"
            )));
        };

        let mut attached = attached != 0;
        if let Some(file_name) = &update.file_name {
            attached = !file_name.is_empty();
        }
        if let Some(doc) = &update.document_type {
            document_type = Some(doc.clone());
        }
        let legible = update.legible.or(legible.map(|v| v != 0));
        let receipt_date = update
            .receipt_date
            .or_else(|| receipt_date.and_then(|r| NaiveDate::parse_from_str(&r, "%Y-%m-%d").ok()));

        let cert_status = certificate_status(attached, legible);
        let requires_doc = document_type.is_some();
        let case_status = if !requires_doc || cert_status == "validated" {
            "complete"
        } else {
            "incomplete"
        };
        let deadline = update.deadline_hours.unwrap_or(48);
        let past_deadline = match (
            NaiveDate::parse_from_str(&start_date, "%Y-%m-%d").ok(),
            receipt_date,
        ) {
            (Some(start), Some(receipt)) => (receipt - start).num_hours() > deadline,
            _ => false,
        };

        conn.execute(
            "UPDATE cases SET document_type = ?2, attached = ?3, legible = ?4,
                              receipt_date = ?5, certificate_status = ?6, case_status = ?7
             WHERE case_id = ?1",
            params![
                case_id,
                document_type,
                attached as i64,
                legible.map(|v| v as i64),
                receipt_date.map(|d| d.format("%Y-%m-%d").to_string()),
                cert_status,
                case_status,
            ],
        )?;

        Ok(CertificateOutcome {
            case_status: case_status.to_string(),
            certificate_status: cert_status.to_string(),
            past_deadline,
        })
    }

    fn history(&self, identifier: &str, limit: usize) -> Result<Vec<CaseSummary>, AbsentiaError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT case_id, reason, start_date, duration, case_status, certificate_status
             FROM cases WHERE identifier = ?1
             ORDER BY created_at DESC, case_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![identifier, limit as i64], |row| {
            Ok(CaseSummary {
                case_id: row.get(0)?,
                reason: row.get(1)?,
                start_date: row.get(2)?,
                duration: row.get(3)?,
                case_status: row.get(4)?,
                certificate_status: row.get(5)?,
            })
        })?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }
}

// ============================================================================
// Tests
// ============================================================================
