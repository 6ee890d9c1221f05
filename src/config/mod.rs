//! Configuration models for limits, watchdogs and backends.

pub mod slots;

pub use slots::{SlotsConfig, StoreConfig, ENV_PREFIX};
