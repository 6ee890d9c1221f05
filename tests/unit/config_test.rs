//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_slot_scheduler::config::{SlotsConfig, StoreConfig};
use prometheus_slot_scheduler::runtime::CoordinatorSettings;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = SlotsConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.hard_cap, 8);
    assert_eq!(cfg.retry_budget, 2);
    assert_eq!(cfg.watchdog().liveness_timeout, Duration::from_secs(90));
    assert_eq!(cfg.watchdog().generation_timeout, Duration::from_secs(25 * 60));
    assert_eq!(cfg.watchdog().salvage_grace, Duration::from_secs(45));
    assert_eq!(cfg.delete_freeze(), Duration::from_millis(1_500));
    assert_eq!(
        CoordinatorSettings::from(&cfg).clear_freeze(3),
        Duration::from_millis(1_800)
    );
    assert_eq!(CoordinatorSettings::from(&cfg).ping_interval, Duration::from_secs(25));
}

#[test]
fn test_limit_above_hard_cap_is_invalid() {
    let cfg = SlotsConfig {
        concurrency_limit: 9,
        ..SlotsConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_hard_cap_is_invalid() {
    let cfg = SlotsConfig {
        concurrency_limit: 0,
        hard_cap: 0,
        ..SlotsConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_limit_is_valid() {
    let cfg = SlotsConfig {
        concurrency_limit: 0,
        ..SlotsConfig::default()
    };
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_liveness_timeout_is_invalid() {
    let cfg = SlotsConfig {
        liveness_timeout_secs: 0,
        ..SlotsConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("liveness_timeout_secs"));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = SlotsConfig::from_json_str(
        r#"{"concurrency_limit": 3, "store": {"kind": "file", "path": "/tmp/slots.json"}}"#,
    )
    .unwrap();
    assert_eq!(cfg.concurrency_limit, 3);
    assert_eq!(cfg.tick_interval_ms, 2_000);
    assert_eq!(
        cfg.store,
        StoreConfig::File {
            path: "/tmp/slots.json".into()
        }
    );
}

#[test]
fn test_from_json_str_rejects_bad_input() {
    assert!(SlotsConfig::from_json_str("not json").is_err());
    assert!(SlotsConfig::from_json_str(r#"{"concurrency_limit": 20}"#).is_err());
}

#[test]
fn test_env_overrides() {
    let cfg = SlotsConfig::from_lookup(lookup(&[
        ("SLOTS_CONCURRENCY_LIMIT", "4"),
        ("SLOTS_RETRY_BUDGET", " 5 "),
        ("SLOTS_RETRY_AFTER_SALVAGE_FAILURE", "true"),
        ("SLOTS_STORE", "file"),
        ("SLOTS_STORE_PATH", "/var/lib/slots.json"),
    ]))
    .unwrap();
    assert_eq!(cfg.concurrency_limit, 4);
    assert_eq!(cfg.recovery_policy().retry_budget, 5);
    assert!(cfg.recovery_policy().retry_after_salvage_failure);
    assert_eq!(
        cfg.store,
        StoreConfig::File {
            path: "/var/lib/slots.json".into()
        }
    );
}

#[test]
fn test_env_errors_name_the_variable() {
    let err = SlotsConfig::from_lookup(lookup(&[("SLOTS_HARD_CAP", "lots")])).unwrap_err();
    assert!(err.contains("SLOTS_HARD_CAP"));

    let err = SlotsConfig::from_lookup(lookup(&[("SLOTS_STORE", "file")])).unwrap_err();
    assert!(err.contains("SLOTS_STORE_PATH"));

    assert!(SlotsConfig::from_lookup(lookup(&[("SLOTS_STORE", "redis")])).is_err());
}
