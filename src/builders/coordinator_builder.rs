//! Build the slot service and per-owner coordinators from [`SlotsConfig`].

use std::sync::Arc;

use anyhow::anyhow;

use crate::config::{SlotsConfig, StoreConfig};
use crate::core::{
    AppResult, ExecutorSpawner, HeartbeatMonitor, Notifier, OwnerId, RecoveryController,
    Scheduler, SharedAuditSink, SlotService, SlotStore, Spawn,
};
use crate::infra::{FileSlotStore, InMemorySlotStore};
use crate::runtime::{Coordinator, CoordinatorSettings};
use crate::util::clock::Clock;

/// Open the configured store backend, publishing to `notifier`.
pub fn build_store(
    cfg: &SlotsConfig,
    notifier: &Notifier,
    clock: Arc<dyn Clock>,
) -> AppResult<Arc<dyn SlotStore>> {
    Ok(match &cfg.store {
        StoreConfig::InMemory => Arc::new(InMemorySlotStore::new(notifier.clone(), clock)),
        StoreConfig::File { path } => Arc::new(FileSlotStore::open(path, notifier.clone(), clock)?),
    })
}

/// Validate `cfg` and build the shared [`SlotService`].
pub fn build_service(
    cfg: &SlotsConfig,
    clock: Arc<dyn Clock>,
    audit: SharedAuditSink,
) -> AppResult<Arc<SlotService>> {
    cfg.validate().map_err(|e| anyhow!("config invalid: {e}"))?;
    let notifier = Notifier::new(cfg.notifier_capacity);
    let store = build_store(cfg, &notifier, clock.clone())?;
    tracing::info!(
        "slot service ready (limit {}, hard cap {})",
        cfg.concurrency_limit,
        cfg.hard_cap
    );
    Ok(Arc::new(SlotService::new(
        store,
        notifier,
        clock,
        cfg.service_options(),
        audit,
    )))
}

/// Wire a [`Coordinator`] for `owner` over an existing service.
pub fn build_coordinator<S>(
    cfg: &SlotsConfig,
    owner: OwnerId,
    service: Arc<SlotService>,
    spawner: Arc<dyn ExecutorSpawner>,
    runtime: S,
) -> Coordinator<S>
where
    S: Spawn + Send + Sync + 'static,
{
    let scheduler = Arc::new(Scheduler::new(
        owner.clone(),
        service.clone(),
        spawner.clone(),
        cfg.dispatch_delay(),
    ));
    let monitor = Arc::new(HeartbeatMonitor::new(cfg.watchdog(), service.clock().clone()));
    let recovery = Arc::new(RecoveryController::new(service.clone(), cfg.recovery_policy()));
    Coordinator::new(
        owner,
        service,
        scheduler,
        monitor,
        recovery,
        spawner,
        runtime,
        CoordinatorSettings::from(cfg),
    )
}
