//! Tests for error types

use prometheus_slot_scheduler::core::{SlotError, SlotStatus, Token};

#[test]
fn test_invalid_transition_error() {
    let err = SlotError::InvalidTransition {
        from: SlotStatus::Done,
        to: SlotStatus::Running,
    };
    assert_eq!(format!("{}", err), "invalid transition: done -> running");
}

#[test]
fn test_limit_out_of_range_error() {
    let err = SlotError::LimitOutOfRange {
        requested: 12,
        hard_cap: 8,
    };
    assert_eq!(
        format!("{}", err),
        "concurrency limit 12 out of range (hard cap 8)"
    );
}

#[test]
fn test_relinquish_timeout_error() {
    let err = SlotError::RelinquishTimeout(Token::from("t1"));
    assert_eq!(format!("{}", err), "executor for t1 did not relinquish in time");
}

#[test]
fn test_storage_error() {
    let err = SlotError::Storage("disk full".to_string());
    assert_eq!(format!("{}", err), "storage error: disk full");
}

#[test]
fn test_error_converts_into_app_result() {
    fn lookup() -> prometheus_slot_scheduler::core::AppResult<()> {
        Err(SlotError::NotFound(Token::from("gone")))?;
        Ok(())
    }
    let err = lookup().unwrap_err();
    assert_eq!(err.to_string(), "slot not found: gone");
}
