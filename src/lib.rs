//! # Prometheus Slot Scheduler
//!
//! Capacity-bounded scheduling for long-running, externally executed
//! generation tasks, with heartbeat liveness detection and requeue-based
//! recovery.
//!
//! Work items ("slots") are submitted by clients, dispatched to an external
//! executor through an [`ExecutorSpawner`](core::ExecutorSpawner), and
//! reported back through [`SlotService`](core::SlotService). The executor is
//! opaque: the scheduler only sees claims, state reports and heartbeats.
//!
//! ## Core Problem Solved
//!
//! - **Bounded concurrency**: the number of `picked`/`running` slots never
//!   exceeds a process-wide limit, even with several coordinators racing on
//!   the same store.
//! - **Unreliable executors**: a vanished executor is detected by the
//!   liveness watchdog and failed without retry; an overlong one is asked to
//!   salvage its output first.
//! - **At-least-once delivery**: late or duplicate reports never regress a
//!   finished slot.
//! - **Clean recovery**: transient failures are requeued under a brand-new
//!   token so no liveness state leaks from the failed attempt.
//!
//! ## Lifecycle
//!
//! ```text
//! waiting -> picked -> running -> { retrying -> (new token) waiting | done | error }
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_slot_scheduler::builders::{build_coordinator, build_service};
//! use prometheus_slot_scheduler::config::SlotsConfig;
//! use prometheus_slot_scheduler::core::{AuditLog, OwnerId, Submission};
//! use prometheus_slot_scheduler::runtime::TokioSpawner;
//! use prometheus_slot_scheduler::util::SystemClock;
//!
//! let cfg = SlotsConfig::from_env()?;
//! let service = build_service(&cfg, Arc::new(SystemClock), AuditLog::new(1_000).sink())?;
//! let coordinator = build_coordinator(
//!     &cfg,
//!     OwnerId::from("alice"),
//!     service.clone(),
//!     Arc::new(MySpawner),
//!     TokioSpawner::current().unwrap(),
//! );
//! service.submit(&OwnerId::from("alice"), Submission { payload: "prompt".into(), ..Default::default() })?;
//! coordinator.tick().await?;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct services and coordinators from configuration.
pub mod builders;
/// Configuration models for limits, watchdogs and backends.
pub mod config;
/// Slot model, transition contract, dispatch, liveness and recovery.
pub mod core;
/// Infrastructure adapters for slot storage.
pub mod infra;
/// Runtime adapters, the per-owner coordinator and the API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
