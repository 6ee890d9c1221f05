//! Tests for builder modules

use std::sync::Arc;

use prometheus_slot_scheduler::builders::{build_service, build_store};
use prometheus_slot_scheduler::config::{SlotsConfig, StoreConfig};
use prometheus_slot_scheduler::core::{AuditLog, NewSlot, Notifier, OwnerId, Token};
use prometheus_slot_scheduler::util::ManualClock;

#[test]
fn test_build_service_uses_config_limits() {
    let cfg = SlotsConfig {
        concurrency_limit: 3,
        hard_cap: 6,
        ..SlotsConfig::default()
    };
    let service = build_service(&cfg, Arc::new(ManualClock::default()), AuditLog::new(10).sink())
        .unwrap();
    assert_eq!(service.concurrency_limit(), 3);
    assert_eq!(service.hard_cap(), 6);
}

#[test]
fn test_build_service_rejects_invalid_config() {
    let cfg = SlotsConfig {
        concurrency_limit: 10,
        ..SlotsConfig::default()
    };
    let err = build_service(&cfg, Arc::new(ManualClock::default()), AuditLog::new(10).sink())
        .err()
        .unwrap();
    assert!(err.to_string().contains("config invalid"));
}

#[test]
fn test_build_store_publishes_to_given_notifier() {
    let notifier = Notifier::new(16);
    let mut rx = notifier.subscribe();
    let store = build_store(&SlotsConfig::default(), &notifier, Arc::new(ManualClock::default()))
        .unwrap();
    store
        .create(NewSlot {
            token: Token::from("t1"),
            owner: OwnerId::from("alice"),
            title: "title".into(),
            payload: "payload".into(),
        })
        .unwrap();
    assert!(rx.try_recv().is_ok());
}

#[test]
fn test_build_store_opens_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SlotsConfig {
        store: StoreConfig::File {
            path: dir.path().join("nested").join("slots.json"),
        },
        ..SlotsConfig::default()
    };
    let store = build_store(&cfg, &Notifier::new(4), Arc::new(ManualClock::default())).unwrap();
    assert!(store.list(&OwnerId::from("alice")).unwrap().is_empty());
}
