//! Tests for audit sink

use prometheus_slot_scheduler::core::{
    build_audit_event, AuditLog, AuditSink, InMemoryAuditSink, OwnerId, Token,
};

fn event(token: &str, action: &str) -> prometheus_slot_scheduler::core::AuditEvent {
    build_audit_event(&Token::from(token), &OwnerId::from("alice"), action, None)
}

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let recorded = build_audit_event(
        &Token::from("t1"),
        &OwnerId::from("alice"),
        "dispatch",
        Some("exec-1".to_string()),
    );
    sink.record(recorded.clone());

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], recorded);
    assert_eq!(events[0].token, Token::from("t1"));
    assert_eq!(events[0].action, "dispatch");
    assert!(!events[0].event_id.is_empty());
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(event("t1", "dispatch"));
    sink.record(event("t2", "dispatch"));
    sink.record(event("t3", "dispatch"));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].token, Token::from("t2"));
    assert_eq!(events[1].token, Token::from("t3"));
}

#[test]
fn test_zero_capacity_sink_drops_everything() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(event("t1", "dispatch"));
    assert!(sink.events().is_empty());
}

#[test]
fn test_audit_log_shares_events_with_its_sink() {
    let log = AuditLog::new(10);
    let shared = log.sink();
    shared.lock().record(event("t1", "requeue"));
    shared.lock().record(event("t2", "fail"));

    assert_eq!(log.events().len(), 2);
    let requeues = log.with_action("requeue");
    assert_eq!(requeues.len(), 1);
    assert_eq!(requeues[0].token, Token::from("t1"));
}
