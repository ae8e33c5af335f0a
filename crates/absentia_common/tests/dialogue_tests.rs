//! End-to-end conversation flows through the dialogue manager.

use std::sync::Arc;

use absentia_common::collaborators::{
    CaseRepository, InMemoryCaseRepository, InMemoryDirectory, InMemoryIdentifierStore,
};
use absentia_common::config::Settings;
use absentia_common::dialogue::DialogueManager;
use absentia_common::facts::Facts;
use absentia_common::kb::load_default;
use serde_json::json;

fn manager() -> DialogueManager {
    manager_with(
        Arc::new(InMemoryCaseRepository::new()),
        Arc::new(InMemoryIdentifierStore::new()),
    )
}

fn manager_with(
    cases: Arc<InMemoryCaseRepository>,
    identifiers: Arc<InMemoryIdentifierStore>,
) -> DialogueManager {
    let kb = load_default().unwrap();
    let directory = Arc::new(InMemoryDirectory::with_employees(&[
        ("1234", "J. Perez"),
        ("2045", "L. Romano"),
    ]));
    DialogueManager::new(kb, Settings::default(), directory, cases, identifiers)
}

#[test]
fn gate_blocks_until_identifier_validated() {
    let mut dm = manager();

    let reply = dm.process_message("chat-1", "hello");
    assert_eq!(reply.ask, vec!["identifier".to_string()]);

    let reply = dm.process_message("chat-1", "9999");
    assert_eq!(reply.ask, vec!["identifier".to_string()]);
    assert!(reply.text.contains("not in the employee directory"));

    let reply = dm.process_message("chat-1", "1234");
    assert!(reply.text.contains("Identifier 1234 verified"));
    // With no goal yet, the manager defaults into case creation.
    assert!(reply.text.contains("reason"));
}

#[test]
fn full_create_case_conversation() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");

    let reply = dm.process_message("chat-1", "reason: illness");
    assert!(reply.ask.contains(&"start_date".to_string()));

    let reply = dm.process_message("chat-1", "start_date: 17/08/2025");
    assert!(reply.ask.contains(&"duration".to_string()));

    let reply = dm.process_message("chat-1", "3 days");
    assert!(reply.text.contains("confirm"));
    assert!(reply.summary.is_some());

    let reply = dm.process_message("chat-1", "confirm");
    assert!(reply.text.contains("A-20250817-0001"), "{}", reply.text);
}

#[test]
fn bare_four_digit_numeral_is_never_a_day_count() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");

    // Mid-flow, while the open slot is the day count, a bare 4-digit
    // numeral is an identifier candidate.
    let reply = dm.process_message("chat-1", "2045");
    assert!(
        reply.ask.contains(&"duration".to_string()),
        "still asking for duration: {:?}",
        reply.ask
    );
}

#[test]
fn free_text_date_answers_reprompt_until_a_date_parses() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");

    // Asking for a different date drops into the free-text date state.
    let reply = dm.process_message("chat-1", "another date");
    assert!(reply.text.contains("From which date"), "{}", reply.text);

    // An unparseable answer re-asks the same slot.
    let reply = dm.process_message("chat-1", "not sure yet");
    assert!(reply.text.contains("From which date"), "{}", reply.text);

    // A parseable date resolves the state and moves on to the day count.
    let reply = dm.process_message("chat-1", "18/08/2025");
    assert!(reply.ask.contains(&"duration".to_string()), "{:?}", reply.ask);

    let reply = dm.process_message("chat-1", "3 days");
    assert!(reply.text.contains("confirm"));
    assert!(reply.summary.unwrap().contains("2025-08-18"));
}

#[test]
fn free_text_day_count_rejects_identifiers_and_absurd_counts() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");

    // "other" drops into the free-text day-count state.
    let reply = dm.process_message("chat-1", "other");
    assert!(reply.text.contains("How many days"), "{}", reply.text);

    // A bare 4-digit numeral is an identifier candidate, not a count.
    let reply = dm.process_message("chat-1", "2045");
    assert!(reply.text.contains("How many days"), "{}", reply.text);

    // An implausibly large count fails to parse and re-asks.
    let reply = dm.process_message("chat-1", "999999999999999 days");
    assert!(reply.text.contains("How many days"), "{}", reply.text);

    // A number word resolves the state.
    let reply = dm.process_message("chat-1", "five");
    assert!(reply.text.contains("confirm"), "{}", reply.text);
    assert!(reply.summary.unwrap().contains("Days (estimated): 5"));
}

#[test]
fn absurd_duration_is_re_asked_not_fatal() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");

    let reply = dm.process_message("chat-1", "999999999999999 days");
    assert!(reply.ask.contains(&"duration".to_string()), "{:?}", reply.ask);
}

#[test]
fn edit_clears_only_the_named_fact() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");
    dm.process_message("chat-1", "3 days");

    let reply = dm.process_message("chat-1", "edit");
    assert!(reply.text.contains("edit"));

    // Clearing the date loops back to asking for it; reason survives.
    let reply = dm.process_message("chat-1", "date");
    assert!(reply.ask.contains(&"start_date".to_string()));
    assert!(!reply.ask.contains(&"reason".to_string()));

    let reply = dm.process_message("chat-1", "start_date: 20/08/2025");
    assert!(reply.text.contains("confirm"));
    assert!(reply.summary.unwrap().contains("2025-08-20"));
}

#[test]
fn persistence_failure_keeps_collected_facts() {
    let cases = Arc::new(InMemoryCaseRepository::new());
    // Pre-existing overlapping case for the same identifier.
    let mut existing = Facts::new();
    existing.insert("identifier".into(), json!("1234"));
    existing.insert("reason".into(), json!("illness"));
    existing.insert("start_date".into(), json!("2025-08-16"));
    existing.insert("duration".into(), json!(5));
    cases.create_case(&existing).unwrap();

    let mut dm = manager_with(cases, Arc::new(InMemoryIdentifierStore::new()));
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");
    dm.process_message("chat-1", "3 days");

    let reply = dm.process_message("chat-1", "confirm");
    assert!(reply.text.contains("Something went wrong"));

    // The collected slots survived: confirming again hits the same
    // overlap instead of re-asking from scratch.
    let reply = dm.process_message("chat-1", "confirm");
    assert!(reply.text.contains("Something went wrong"));
}

#[test]
fn family_illness_relationship_domain_is_enforced() {
    let mut dm = manager();
    dm.process_message("chat-1", "1234");
    dm.process_message("chat-1", "reason: family_illness");
    dm.process_message("chat-1", "start_date: 17/08/2025");

    let reply = dm.process_message("chat-1", "2 days");
    assert!(reply.ask.contains(&"relationship".to_string()));

    // Parseable but out of domain: clarification, not a silent default.
    let reply = dm.process_message("chat-1", "relationship: neighbour");
    assert!(reply.ask.contains(&"relationship".to_string()));
    assert!(reply.text.contains("needs confirmation"));

    let reply = dm.process_message("chat-1", "relationship: mother");
    assert!(reply.text.contains("confirm"));
}

#[test]
fn shared_identifier_store_skips_gate_across_managers() {
    let identifiers = Arc::new(InMemoryIdentifierStore::new());
    let cases = Arc::new(InMemoryCaseRepository::new());

    let mut dm = manager_with(cases.clone(), identifiers.clone());
    dm.process_message("chat-1", "1234");

    // A fresh manager sharing the identifier store: same conversation
    // key validates without being asked.
    let mut dm2 = manager_with(cases, identifiers);
    let reply = dm2.process_message("chat-1", "hello");
    assert!(!reply.ask.contains(&"identifier".to_string()), "{:?}", reply);
}

#[test]
fn attach_document_flow_updates_certificate() {
    let cases = Arc::new(InMemoryCaseRepository::new());
    let mut existing = Facts::new();
    existing.insert("identifier".into(), json!("1234"));
    existing.insert("reason".into(), json!("illness"));
    existing.insert("start_date".into(), json!("2025-08-17"));
    existing.insert("duration".into(), json!(3));
    existing.insert("document_type".into(), json!("medical_certificate"));
    let created = cases.create_case(&existing).unwrap();

    let mut dm = manager_with(cases, Arc::new(InMemoryIdentifierStore::new()));
    dm.process_message("chat-1", "1234");
    let reply = dm.process_message("chat-1", "I want to attach the certificate");
    assert!(reply.ask.contains(&"attachment".to_string()), "{:?}", reply.ask);

    let reply = dm.process_message(
        "chat-1",
        &format!("case_id: {}\nattachment: cert.pdf", created.case_id),
    );
    assert!(reply.text.contains("Certificate recorded"), "{}", reply.text);
    assert!(reply.text.contains("validated"));
}

#[test]
fn query_status_lists_case_history() {
    let cases = Arc::new(InMemoryCaseRepository::new());
    let mut existing = Facts::new();
    existing.insert("identifier".into(), json!("1234"));
    existing.insert("reason".into(), json!("marriage"));
    existing.insert("start_date".into(), json!("2025-09-20"));
    existing.insert("duration".into(), json!(10));
    let created = cases.create_case(&existing).unwrap();

    let mut dm = manager_with(cases, Arc::new(InMemoryIdentifierStore::new()));
    dm.process_message("chat-1", "1234");
    let reply = dm.process_message("chat-1", "what is the status of my case");
    assert!(reply.text.contains(&created.case_id), "{}", reply.text);
    assert!(reply.text.contains("marriage"));
}
