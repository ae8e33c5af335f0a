//! Error types for Absentia.
//!
//! The taxonomy mirrors how each error is recovered:
//! - `Validation` is fatal at knowledge-base load time; the process must
//!   refuse to start rather than run with a partially valid rule set.
//! - `Slot` is recovered locally by re-prompting the same slot.
//! - `Domain` is surfaced as a clarification request with a trace.
//! - `Persistence` is reported to the user; collected facts are kept.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AbsentiaError {
    #[error("Knowledge base validation failed: {0}")]
    Validation(String),

    #[error("Could not interpret '{input}' as {expected}")]
    Slot { input: String, expected: String },

    #[error("Value '{value}' is outside the domain of {variable}")]
    Domain { variable: String, value: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl AbsentiaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AbsentiaError::Validation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        AbsentiaError::Persistence(msg.into())
    }
}
