//! Dialogue state machine - one conversation turn at a time.
//!
//! Every inbound message runs fact extraction, then the identity gate,
//! then goal classification, then the goal's flow. The create-case flow
//! walks explicit UI sub-states (free-text date, free-text day count,
//! confirmation, edit target) until the case is confirmed or abandoned.
//! Slot errors are recovered by re-prompting; a persistence failure is
//! reported to the user with all collected facts kept for retry.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::{
    CaseRepository, CertificateUpdate, EmployeeDirectory, IdentifierStore,
};
use crate::config::Settings;
use crate::engine::{backward, forward, BackwardResult, Goal};
use crate::error::AbsentiaError;
use crate::explain::{format_explanation, Trace};
use crate::facts::{fact_str, is_filled};
use crate::kb::KnowledgeBase;
use crate::normalize::{
    extract_pairs, normalize_reason, normalize_text, parse_date, parse_day_count,
};
use crate::prompts::{
    self, msg_case_created, msg_confirm, msg_edit_target, msg_error, msg_identifier_verified,
    msg_invalid_identifier, prompt_certificate, PromptRegistry,
};
use crate::session::{Awaiting, InMemorySessionStore, Session, SessionStore};

/// One reply to the transport layer.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Text to send back.
    pub text: String,
    /// Slots still being asked for, when prompting.
    pub ask: Vec<String>,
    /// Case summary, when one was built this turn.
    pub summary: Option<String>,
    /// Rendered top explanation trace, when the engine ran.
    pub trace: Option<String>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Reply {
        Reply {
            text: text.into(),
            ..Default::default()
        }
    }

    fn ask(text: impl Into<String>, ask: Vec<String>) -> Reply {
        Reply {
            text: text.into(),
            ask,
            ..Default::default()
        }
    }
}

/// Per-process dialogue controller. Holds the session store; the engine
/// itself is stateless over the shared knowledge base.
pub struct DialogueManager {
    kb: KnowledgeBase,
    settings: Settings,
    prompts: PromptRegistry,
    sessions: Box<dyn SessionStore>,
    directory: Arc<dyn EmployeeDirectory>,
    cases: Arc<dyn CaseRepository>,
    identifiers: Arc<dyn IdentifierStore>,
}

impl DialogueManager {
    pub fn new(
        kb: KnowledgeBase,
        settings: Settings,
        directory: Arc<dyn EmployeeDirectory>,
        cases: Arc<dyn CaseRepository>,
        identifiers: Arc<dyn IdentifierStore>,
    ) -> Self {
        DialogueManager {
            kb,
            settings,
            prompts: PromptRegistry::standard(),
            sessions: Box::new(InMemorySessionStore::new()),
            directory,
            cases,
            identifiers,
        }
    }

    /// Swap the session store (e.g. for an external one).
    pub fn with_session_store(mut self, sessions: Box<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Process one inbound message for a session.
    pub fn process_message(&mut self, session_id: &str, text: &str) -> Reply {
        let mut session = self
            .sessions
            .get(session_id)
            .unwrap_or_else(Session::new);

        // Merge newly stated facts before anything else.
        let delta = extract_pairs(text);
        if !delta.is_empty() {
            debug!(session = session_id, facts = ?delta.keys().collect::<Vec<_>>(), "extracted facts");
        }
        session.facts.extend(delta);

        // Pre-load a remembered identifier so returning users skip the gate.
        if !is_filled(&session.facts, "identifier") {
            if let Some(stored) = self.identifiers.get_identifier(session_id) {
                session.facts.insert("identifier".to_string(), json!(stored));
            }
        }

        // Identity gate: nothing proceeds without a validated identifier.
        if let Some(reply) = self.gate(session_id, &mut session, text) {
            self.sessions.put(session_id, session);
            return reply;
        }

        // Classify on every turn, but only switch goals between sub-states
        // so a stray keyword cannot derail a pending answer.
        let text_norm = normalize_text(text);
        if matches!(session.awaiting, Awaiting::None) {
            if let Some(goal) = classify_goal(&text_norm) {
                if session.goal != Some(goal) {
                    info!(session = session_id, %goal, "goal set");
                    session.goal = Some(goal);
                }
            }
        }

        let reply = match session.goal {
            Some(Goal::CreateCase) => self.create_flow(&mut session, text, &text_norm),
            Some(goal) => self.resolver_flow(goal, &mut session),
            None => {
                // No goal yet: run a forward pass over whatever we have
                // and surface the short summary with its top trace.
                let fw = forward(&self.kb, &session.facts, self.settings.deadline_hours);
                session.facts = fw.facts;
                let trace = fw.traces.first().map(Trace::render);
                Reply {
                    text: prompts::short_summary(&session.facts),
                    ask: Vec::new(),
                    summary: Some(prompts::short_summary(&session.facts)),
                    trace,
                }
            }
        };

        self.sessions.put(session_id, session);
        reply
    }

    // ------------------------------------------------------------------
    // Identity gate
    // ------------------------------------------------------------------

    /// Returns a reply while the session is still gated, `None` once the
    /// identifier is validated.
    fn gate(&self, session_key: &str, session: &mut Session, incoming: &str) -> Option<Reply> {
        if let Some(id) = session.validated_identifier.clone() {
            session
                .facts
                .entry("identifier".to_string())
                .or_insert_with(|| json!(id));
            return None;
        }

        let candidate = identifier_candidate(session, incoming);
        let Some(candidate) = candidate else {
            session.awaiting = Awaiting::Identifier;
            return Some(Reply::ask(
                self.prompts
                    .prompt_for("identifier", &self.kb.glossary)
                    .unwrap_or_default(),
                vec!["identifier".to_string()],
            ));
        };

        let valid = match self.directory.validate(&candidate) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "employee directory lookup failed");
                false
            }
        };
        if !valid {
            session.awaiting = Awaiting::Identifier;
            return Some(Reply::ask(
                msg_invalid_identifier(),
                vec!["identifier".to_string()],
            ));
        }

        session.validated_identifier = Some(candidate.clone());
        session
            .facts
            .insert("identifier".to_string(), json!(candidate));
        if let Ok(Some(name)) = self.directory.name_of(&candidate) {
            session
                .facts
                .insert("employee_name".to_string(), json!(name));
        }
        session.awaiting = Awaiting::None;
        self.identifiers.set_identifier(session_key, &candidate);
        info!(session = session_key, identifier = %candidate, "identity gate passed");

        let mut reply = msg_identifier_verified(&candidate);
        if session.goal.is_none() {
            // Default into case creation and ask for the reason directly.
            session.goal = Some(Goal::CreateCase);
            reply.push('\n');
            reply.push_str(&prompts::prompt_reason(&self.kb.glossary));
        }
        Some(Reply::text(reply))
    }

    // ------------------------------------------------------------------
    // Create-case flow
    // ------------------------------------------------------------------

    fn create_flow(&self, session: &mut Session, text: &str, text_norm: &str) -> Reply {
        // Resolve pending sub-state answers first.
        match session.awaiting {
            Awaiting::FreeTextDate => match parse_date(text) {
                Some(date) => {
                    session.facts.insert("start_date".to_string(), json!(date));
                    session.awaiting = Awaiting::None;
                }
                None => {
                    // Re-prompt the same slot, keep everything.
                    let err = AbsentiaError::Slot {
                        input: text.trim().to_string(),
                        expected: "a start date".to_string(),
                    };
                    debug!(%err, "slot value rejected");
                    return Reply::text(prompts::prompt_start_date(&self.kb.glossary));
                }
            },
            Awaiting::FreeTextDayCount => {
                // A bare 4-digit numeral is an identifier candidate even
                // here, never a day count.
                match (is_bare_identifier(text), parse_day_count(text)) {
                    (false, Some(days)) => {
                        session.facts.insert("duration".to_string(), json!(days));
                        session.awaiting = Awaiting::None;
                    }
                    _ => {
                        let err = AbsentiaError::Slot {
                            input: text.trim().to_string(),
                            expected: "a day count".to_string(),
                        };
                        debug!(%err, "slot value rejected");
                        return Reply::text(prompts::prompt_duration(&self.kb.glossary));
                    }
                }
            }
            Awaiting::Confirmation => return self.handle_confirmation(session, text_norm),
            Awaiting::EditTarget => {
                let mut edited = false;
                if text_norm.contains("reason") {
                    session.facts.remove("reason");
                    edited = true;
                }
                if text_norm.contains("date") {
                    session.facts.remove("start_date");
                    edited = true;
                }
                if text_norm.contains("day") {
                    session.facts.remove("duration");
                    edited = true;
                }
                session.awaiting = Awaiting::None;
                if !edited {
                    return Reply::text(msg_edit_target());
                }
            }
            Awaiting::None | Awaiting::Identifier => {}
        }

        // Direct shortcuts from plain text before asking the resolver.
        if !is_filled(&session.facts, "reason") {
            if let Some(reason) = normalize_reason(text_norm) {
                session.facts.insert("reason".to_string(), json!(reason));
            }
        }
        if !is_filled(&session.facts, "start_date") {
            let date = parse_date(text).or_else(|| {
                ["tomorrow", "today", "yesterday"]
                    .iter()
                    .find(|kw| text_norm.contains(*kw))
                    .and_then(|kw| parse_date(kw))
            });
            if let Some(date) = date {
                session.facts.insert("start_date".to_string(), json!(date));
            }
        } else if text_norm == "another date" {
            session.awaiting = Awaiting::FreeTextDate;
            return Reply::text(prompts::prompt_start_date(&self.kb.glossary));
        }
        if !is_filled(&session.facts, "duration") {
            if text_norm.starts_with("other") {
                session.awaiting = Awaiting::FreeTextDayCount;
                return Reply::text(prompts::prompt_duration(&self.kb.glossary));
            }
            if !is_bare_identifier(text) {
                if let Some(days) = parse_day_count(text) {
                    session.facts.insert("duration".to_string(), json!(days));
                }
            }
        }

        match backward(
            &self.kb,
            Goal::CreateCase,
            &session.facts,
            self.settings.deadline_hours,
        ) {
            BackwardResult::NeedInfo { ask } => Reply::ask(
                self.prompts.prompt_for_first(&ask, &self.kb.glossary),
                ask,
            ),
            BackwardResult::NoMatch { traces } => {
                // The value parsed but is outside its domain. Clear it and
                // ask again with the accepted set.
                let err = AbsentiaError::Domain {
                    variable: "relationship".to_string(),
                    value: fact_str(&session.facts, "relationship")
                        .unwrap_or_default()
                        .to_string(),
                };
                debug!(%err, "domain value rejected");
                session.facts.remove("relationship");
                let text = format!(
                    "{}\n{}",
                    format_explanation(&traces),
                    prompts::prompt_relationship(&self.kb.glossary)
                );
                Reply::ask(text, vec!["relationship".to_string()])
            }
            BackwardResult::Concluded { facts, traces } => {
                session.facts = facts;
                let trace_line = traces.first().map(Trace::render);
                let summary = prompts::summary(&session.facts, trace_line.as_deref());
                session.awaiting = Awaiting::Confirmation;

                let mut text = msg_confirm(&summary);
                let document_type = fact_str(&session.facts, "document_type");
                let cert_required =
                    fact_str(&session.facts, "certificate_status") != Some("not_required");
                if document_type.is_some() && cert_required {
                    text.push('\n');
                    text.push_str(&prompt_certificate(document_type));
                }
                Reply {
                    text,
                    ask: Vec::new(),
                    summary: Some(summary),
                    trace: trace_line,
                }
            }
        }
    }

    fn handle_confirmation(&self, session: &mut Session, text_norm: &str) -> Reply {
        if text_norm.starts_with("confirm") {
            let fw = forward(&self.kb, &session.facts, self.settings.deadline_hours);
            session.facts = fw.facts;
            return match self.cases.create_case(&session.facts) {
                Ok(created) => {
                    session
                        .facts
                        .insert("case_id".to_string(), json!(created.case_id));
                    session.awaiting = Awaiting::None;
                    info!(case_id = %created.case_id, "case committed");
                    Reply::text(msg_case_created(Some(&created.case_id)))
                }
                Err(e) => {
                    // PersistenceError: report it, keep every collected
                    // fact, and stay in confirmation for a retry.
                    warn!(error = %e, "case creation failed");
                    Reply::text(msg_error(&e.to_string()))
                }
            };
        }
        if text_norm.starts_with("edit") {
            session.awaiting = Awaiting::EditTarget;
            return Reply::text(msg_edit_target());
        }
        let summary = prompts::summary(&session.facts, None);
        Reply {
            text: msg_confirm(&summary),
            ask: Vec::new(),
            summary: Some(summary),
            trace: None,
        }
    }

    // ------------------------------------------------------------------
    // Resolver-driven flows (attach / query / modify / cancel)
    // ------------------------------------------------------------------

    fn resolver_flow(&self, goal: Goal, session: &mut Session) -> Reply {
        match backward(&self.kb, goal, &session.facts, self.settings.deadline_hours) {
            BackwardResult::NeedInfo { ask } => Reply::ask(
                self.prompts.prompt_for_first(&ask, &self.kb.glossary),
                ask,
            ),
            BackwardResult::NoMatch { traces } => Reply {
                text: format!("I need to double-check that.\n{}", format_explanation(&traces)),
                ask: Vec::new(),
                summary: None,
                trace: traces.first().map(Trace::render),
            },
            BackwardResult::Concluded { facts, traces } => {
                session.facts = facts;
                let trace_line = traces.first().map(Trace::render);
                let text = match goal {
                    Goal::AttachDocument => self.finalize_attachment(session),
                    Goal::QueryStatus => self.finalize_status_query(session),
                    _ => prompts::short_summary(&session.facts),
                };
                Reply {
                    text,
                    ask: Vec::new(),
                    summary: Some(prompts::short_summary(&session.facts)),
                    trace: trace_line,
                }
            }
        }
    }

    /// Record the certificate against a known case, or just report the
    /// derived certificate state when only identifier + date were given.
    fn finalize_attachment(&self, session: &mut Session) -> String {
        let Some(case_id) = fact_str(&session.facts, "case_id").map(str::to_string) else {
            return prompts::short_summary(&session.facts);
        };
        let update = CertificateUpdate {
            file_name: fact_str(&session.facts, "attachment").map(str::to_string),
            document_type: fact_str(&session.facts, "document_type").map(str::to_string),
            legible: crate::facts::fact_bool(&session.facts, "document_legible"),
            receipt_date: crate::facts::fact_date(&session.facts, "receipt_date"),
            deadline_hours: Some(self.settings.deadline_hours),
        };
        match self.cases.update_certificate(&case_id, &update) {
            Ok(outcome) => {
                let deadline_note = if outcome.past_deadline {
                    " Note: the certificate arrived past the deadline."
                } else {
                    ""
                };
                format!(
                    "Certificate recorded for case {case_id}: {} (case {}).{deadline_note}",
                    outcome.certificate_status, outcome.case_status
                )
            }
            Err(e) => {
                warn!(error = %e, case_id = %case_id, "certificate update failed");
                msg_error(&e.to_string())
            }
        }
    }

    fn finalize_status_query(&self, session: &mut Session) -> String {
        let Some(identifier) = fact_str(&session.facts, "identifier").map(str::to_string) else {
            return prompts::short_summary(&session.facts);
        };
        match self.cases.history(&identifier, 5) {
            Ok(history) if history.is_empty() => {
                format!("No cases on file for identifier {identifier}.")
            }
            Ok(history) => history
                .iter()
                .map(|c| {
                    format!(
                        "{}: {} from {} ({} days) - {}",
                        c.case_id,
                        c.reason,
                        c.start_date,
                        c.duration,
                        c.case_status.as_deref().unwrap_or("-")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(error = %e, "history lookup failed");
                msg_error(&e.to_string())
            }
        }
    }
}

// ============================================================================
// Classification helpers
// ============================================================================

/// Fixed keyword classifier for the five goals. First match wins.
fn classify_goal(text_norm: &str) -> Option<Goal> {
    const CREATE: [&str; 5] = ["report", "absence", "sick", "leave", "create case"];
    const ATTACH: [&str; 4] = ["attach", "certificate", "document", "send doc"];
    const QUERY: [&str; 3] = ["status", "how is", "my case"];
    const MODIFY: [&str; 3] = ["change", "extend", "modify"];
    const CANCEL: [&str; 2] = ["cancel", "void"];

    if CREATE.iter().any(|kw| text_norm.contains(kw)) {
        Some(Goal::CreateCase)
    } else if ATTACH.iter().any(|kw| text_norm.contains(kw)) {
        Some(Goal::AttachDocument)
    } else if QUERY.iter().any(|kw| text_norm.contains(kw)) {
        Some(Goal::QueryStatus)
    } else if MODIFY.iter().any(|kw| text_norm.contains(kw)) {
        Some(Goal::ModifyCase)
    } else if CANCEL.iter().any(|kw| text_norm.contains(kw)) {
        Some(Goal::CancelCase)
    } else {
        None
    }
}

/// Whether the whole message is a bare 4-digit numeral.
fn is_bare_identifier(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit())
}

/// Identifier candidate from the message, the fact store, or an
/// `/id 1234` command.
fn identifier_candidate(session: &Session, incoming: &str) -> Option<String> {
    if let Some(candidate) = crate::normalize::parse_identifier(incoming) {
        return Some(candidate);
    }
    if let Some(raw) = fact_str(&session.facts, "identifier") {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 4 {
            return Some(digits[..4].to_string());
        }
    }
    let lower = incoming.to_lowercase();
    lower
        .split_whitespace()
        .collect::<Vec<_>>()
        .windows(2)
        .find(|w| w[0] == "/id" && w[1].len() == 4 && w[1].chars().all(|c| c.is_ascii_digit()))
        .map(|w| w[1].to_string())
}

// ============================================================================
// Tests
// ============================================================================
