//! Per-conversation session state and the session store abstraction.
//!
//! One session per conversation key. The core assumes at most one
//! in-flight message per session id; the transport serializes messages
//! for the same key. The store is a trait so a deployment can swap the
//! in-process map for something else without touching the state machine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::Goal;
use crate::facts::Facts;

/// Transient UI sub-state inside a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    /// No pending sub-question.
    #[default]
    None,
    /// Waiting for the 4-digit identifier (identity gate).
    Identifier,
    /// Waiting for a free-text start date.
    FreeTextDate,
    /// Waiting for a free-text day count.
    FreeTextDayCount,
    /// Waiting for confirm/edit on the case summary.
    Confirmation,
    /// Waiting for the name of the field to edit.
    EditTarget,
}

/// State for one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub facts: Facts,
    pub goal: Option<Goal>,
    pub awaiting: Awaiting,
    /// Identifier that passed the identity gate, if any.
    pub validated_identifier: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            awaiting: Awaiting::Identifier,
            ..Default::default()
        }
    }
}

/// Storage for sessions keyed by conversation id.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<Session>;
    fn put(&mut self, session_id: &str, session: Session);
    fn delete(&mut self, session_id: &str);
}

/// In-process session store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: HashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).cloned()
    }

    fn put(&mut self, session_id: &str, session: Session) {
        self.sessions.insert(session_id.to_string(), session);
    }

    fn delete(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
