//! Scheduler, watchdog and backend configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{RecoveryPolicy, ServiceOptions, WatchdogConfig};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SLOTS_";

/// Slot store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile in-memory table.
    #[default]
    InMemory,
    /// JSON snapshot on disk.
    File {
        /// Snapshot path.
        path: PathBuf,
    },
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsConfig {
    /// Initial concurrency limit (0 = coordination only).
    pub concurrency_limit: u32,
    /// Highest limit a client may set.
    pub hard_cap: u32,
    /// Coordinator timer period.
    pub tick_interval_ms: u64,
    /// Pause between successive dispatches in one tick.
    pub dispatch_delay_ms: u64,
    /// Liveness watchdog threshold.
    pub liveness_timeout_secs: u64,
    /// Generation-duration watchdog threshold.
    pub generation_timeout_secs: u64,
    /// Grace after a salvage request.
    pub salvage_grace_secs: u64,
    /// Requeues per lineage.
    pub retry_budget: u32,
    /// Bounded wait for an executor to relinquish on delete.
    pub relinquish_wait_ms: u64,
    /// Dispatch freeze after a delete.
    pub delete_freeze_ms: u64,
    /// Dispatch freeze after a clear, fixed part.
    pub clear_freeze_base_ms: u64,
    /// Dispatch freeze after a clear, per removed slot.
    pub clear_freeze_per_slot_ms: u64,
    /// Minimum spacing of focus pokes.
    pub pin_focus_throttle_ms: u64,
    /// Notifier keep-alive period.
    pub ping_interval_secs: u64,
    /// Notifier ring buffer size.
    pub notifier_capacity: usize,
    /// Idle advisory entries are dropped after this.
    pub control_idle_ttl_secs: u64,
    /// Requeue after a failed salvage instead of failing.
    pub retry_after_salvage_failure: bool,
    /// Backend.
    pub store: StoreConfig,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            hard_cap: 8,
            tick_interval_ms: 2_000,
            dispatch_delay_ms: 250,
            liveness_timeout_secs: 90,
            generation_timeout_secs: 25 * 60,
            salvage_grace_secs: 45,
            retry_budget: 2,
            relinquish_wait_ms: 1_200,
            delete_freeze_ms: 1_500,
            clear_freeze_base_ms: 1_200,
            clear_freeze_per_slot_ms: 200,
            pin_focus_throttle_ms: 1_500,
            ping_interval_secs: 25,
            notifier_capacity: 256,
            control_idle_ttl_secs: 12 * 60,
            retry_after_salvage_failure: false,
            store: StoreConfig::InMemory,
        }
    }
}

impl SlotsConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.hard_cap == 0 {
            return Err("hard_cap must be greater than 0".into());
        }
        if self.concurrency_limit > self.hard_cap {
            return Err(format!(
                "concurrency_limit {} exceeds hard_cap {}",
                self.concurrency_limit, self.hard_cap
            ));
        }
        let positive = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("liveness_timeout_secs", self.liveness_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
            ("salvage_grace_secs", self.salvage_grace_secs),
            ("relinquish_wait_ms", self.relinquish_wait_ms),
            ("ping_interval_secs", self.ping_interval_secs),
            ("control_idle_ttl_secs", self.control_idle_ttl_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(format!("{name} must be greater than 0"));
            }
        }
        if self.notifier_capacity == 0 {
            return Err("notifier_capacity must be greater than 0".into());
        }
        if let StoreConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("store path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `SLOTS_*` variables, after loading `.env`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through `lookup`, keyed by `SLOTS_<FIELD>`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let get = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()));

        override_with(&mut cfg.concurrency_limit, get("concurrency_limit"), "concurrency_limit")?;
        override_with(&mut cfg.hard_cap, get("hard_cap"), "hard_cap")?;
        override_with(&mut cfg.tick_interval_ms, get("tick_interval_ms"), "tick_interval_ms")?;
        override_with(&mut cfg.dispatch_delay_ms, get("dispatch_delay_ms"), "dispatch_delay_ms")?;
        override_with(
            &mut cfg.liveness_timeout_secs,
            get("liveness_timeout_secs"),
            "liveness_timeout_secs",
        )?;
        override_with(
            &mut cfg.generation_timeout_secs,
            get("generation_timeout_secs"),
            "generation_timeout_secs",
        )?;
        override_with(&mut cfg.salvage_grace_secs, get("salvage_grace_secs"), "salvage_grace_secs")?;
        override_with(&mut cfg.retry_budget, get("retry_budget"), "retry_budget")?;
        override_with(&mut cfg.relinquish_wait_ms, get("relinquish_wait_ms"), "relinquish_wait_ms")?;
        override_with(&mut cfg.delete_freeze_ms, get("delete_freeze_ms"), "delete_freeze_ms")?;
        override_with(
            &mut cfg.clear_freeze_base_ms,
            get("clear_freeze_base_ms"),
            "clear_freeze_base_ms",
        )?;
        override_with(
            &mut cfg.clear_freeze_per_slot_ms,
            get("clear_freeze_per_slot_ms"),
            "clear_freeze_per_slot_ms",
        )?;
        override_with(
            &mut cfg.pin_focus_throttle_ms,
            get("pin_focus_throttle_ms"),
            "pin_focus_throttle_ms",
        )?;
        override_with(&mut cfg.ping_interval_secs, get("ping_interval_secs"), "ping_interval_secs")?;
        override_with(&mut cfg.notifier_capacity, get("notifier_capacity"), "notifier_capacity")?;
        override_with(
            &mut cfg.control_idle_ttl_secs,
            get("control_idle_ttl_secs"),
            "control_idle_ttl_secs",
        )?;
        override_with(
            &mut cfg.retry_after_salvage_failure,
            get("retry_after_salvage_failure"),
            "retry_after_salvage_failure",
        )?;

        match get("store").as_deref().map(str::trim) {
            None | Some("" | "in_memory" | "memory") => {}
            Some("file") => {
                let path = get("store_path")
                    .ok_or_else(|| format!("{ENV_PREFIX}STORE_PATH is required for the file store"))?;
                cfg.store = StoreConfig::File { path: path.into() };
            }
            Some(other) => return Err(format!("unknown store backend `{other}`")),
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Timer period.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Inter-dispatch pause.
    pub const fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    /// Freeze after a delete.
    pub const fn delete_freeze(&self) -> Duration {
        Duration::from_millis(self.delete_freeze_ms)
    }

    /// Keep-alive period.
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Idle TTL for advisory entries.
    pub const fn control_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.control_idle_ttl_secs)
    }

    /// Watchdog thresholds.
    pub const fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            liveness_timeout: Duration::from_secs(self.liveness_timeout_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            salvage_grace: Duration::from_secs(self.salvage_grace_secs),
        }
    }

    /// Recovery limits.
    pub const fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            retry_budget: self.retry_budget,
            retry_after_salvage_failure: self.retry_after_salvage_failure,
        }
    }

    /// Service tunables.
    pub const fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            concurrency_limit: self.concurrency_limit,
            hard_cap: self.hard_cap,
            relinquish_wait: Duration::from_millis(self.relinquish_wait_ms),
            focus_throttle: Duration::from_millis(self.pin_focus_throttle_ms),
        }
    }
}

fn override_with<T: FromStr>(slot: &mut T, raw: Option<String>, name: &str) -> Result<(), String>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = raw {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{}: {e}", name.to_ascii_uppercase()))?;
    }
    Ok(())
}
