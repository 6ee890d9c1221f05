//! Per-owner coordinator: watchdog sweep, recovery hand-off and dispatch.
//!
//! A [`Coordinator`] ties one [`Scheduler`], one [`HeartbeatMonitor`] and one
//! [`RecoveryController`] to a shared [`SlotService`]. Each tick:
//!
//! 1. sweeps the owner's slots through both watchdogs,
//! 2. starts salvage or recovery for whatever fired, plus executor-reported
//!    transient errors seen since this coordinator started,
//! 3. runs a scheduler tick and hands `retrying` slots to recovery.
//!
//! Salvage and recovery run as background tasks on the runtime spawner so a
//! slow executor never holds up dispatch. [`Coordinator::settle`] waits for
//! them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};

use crate::config::SlotsConfig;
use crate::core::audit;
use crate::core::{
    ClearReport, ClearScope, ExecutorSpawner, FailureReason, HeartbeatMonitor, Notification,
    OwnerId, RecoveryController, RecoveryOutcome, Scheduler, Slot, SlotError, SlotService,
    SlotStatus, Spawn, TickReport, Token, WatchdogEvent,
};

/// Coordinator timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Timer period for [`Coordinator::run`].
    pub tick_interval: Duration,
    /// Dispatch freeze after a delete.
    pub delete_freeze: Duration,
    /// Dispatch freeze after a clear, fixed part.
    pub clear_freeze_base: Duration,
    /// Dispatch freeze after a clear, per removed slot.
    pub clear_freeze_per_slot: Duration,
    /// Idle advisory entries are pruned after this.
    pub control_idle_ttl: Duration,
    /// Grace given to a salvage request.
    pub salvage_grace: Duration,
    /// Keep-alive period of the notifier pinger started by [`Coordinator::run`].
    pub ping_interval: Duration,
}

impl From<&SlotsConfig> for CoordinatorSettings {
    fn from(cfg: &SlotsConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval(),
            delete_freeze: cfg.delete_freeze(),
            clear_freeze_base: Duration::from_millis(cfg.clear_freeze_base_ms),
            clear_freeze_per_slot: Duration::from_millis(cfg.clear_freeze_per_slot_ms),
            control_idle_ttl: cfg.control_idle_ttl(),
            salvage_grace: cfg.watchdog().salvage_grace,
            ping_interval: cfg.ping_interval(),
        }
    }
}

impl CoordinatorSettings {
    /// Dispatch freeze after clearing `removed` slots.
    pub fn clear_freeze(&self, removed: usize) -> Duration {
        let per_slot = self
            .clear_freeze_per_slot
            .saturating_mul(u32::try_from(removed).unwrap_or(u32::MAX));
        self.clear_freeze_base.saturating_add(per_slot)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&SlotsConfig::default())
    }
}

/// What one [`Coordinator::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Watchdog events raised by the sweep.
    pub watchdog: Vec<WatchdogEvent>,
    /// Background salvage/recovery tasks started.
    pub recoveries_started: usize,
    /// Scheduler tick summary.
    pub tick: TickReport,
}

#[derive(Debug, Default)]
struct Background {
    pending: AtomicUsize,
    idle: Notify,
}

impl Background {
    fn enter(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Everything a background task needs.
#[derive(Clone)]
struct TaskContext {
    service: Arc<SlotService>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<HeartbeatMonitor>,
    recovery: Arc<RecoveryController>,
    spawner: Arc<dyn ExecutorSpawner>,
    background: Arc<Background>,
    salvage_grace: Duration,
}

impl TaskContext {
    fn recover(&self, token: &Token, reason: FailureReason) -> Option<RecoveryOutcome> {
        match self.recovery.recover(token, reason) {
            Ok(outcome) => {
                tracing::debug!("recovery of {}: {:?}", token, outcome);
                Some(outcome)
            }
            Err(err) => {
                tracing::warn!("recovery of {} failed: {}", token, err);
                None
            }
        }
    }

    async fn release(&self, token: &Token, outcome: Option<RecoveryOutcome>) {
        let finished = matches!(
            outcome,
            Some(
                RecoveryOutcome::Failed { .. }
                    | RecoveryOutcome::Exhausted { .. }
                    | RecoveryOutcome::Requeued { .. }
                    | RecoveryOutcome::Vanished
            )
        );
        if !finished {
            return;
        }
        if let Some(handle) = self.scheduler.forget(token) {
            if self.spawner.abort(&handle).await {
                tracing::debug!("aborted executor {} for {}", handle.id, token);
            }
        }
        self.monitor.forget(token);
        if matches!(
            outcome,
            Some(RecoveryOutcome::Requeued { .. } | RecoveryOutcome::Vanished)
        ) {
            self.recovery.forget(token);
        }
    }

    async fn recover_and_release(&self, token: Token, reason: FailureReason) {
        let outcome = self.recover(&token, reason);
        self.release(&token, outcome).await;
    }

    async fn salvage(&self, token: Token) {
        let acknowledged = match self.scheduler.handle(&token) {
            Some(handle) => matches!(
                tokio::time::timeout(self.salvage_grace, self.spawner.request_salvage(&handle))
                    .await,
                Ok(Ok(true))
            ),
            None => false,
        };
        if acknowledged {
            self.monitor.salvage_started(&token);
            self.service.sessions().rebind(&token);
            if let Ok(slot) = self.service.store().get(&token) {
                audit::record(self.service.audit(), &token, &slot.owner, "salvage", None);
            }
            tracing::info!("salvage acknowledged for {}", token);
        } else {
            tracing::warn!("salvage for {} not acknowledged", token);
            self.recover_and_release(token, FailureReason::SalvageFailed)
                .await;
        }
    }
}

/// Per-owner scheduling loop.
pub struct Coordinator<S> {
    owner: OwnerId,
    ctx: TaskContext,
    runtime: S,
    settings: CoordinatorSettings,
    started_at: u128,
    rescued: Mutex<HashSet<Token>>,
}

impl<S> Coordinator<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Assemble a coordinator from its parts.
    pub fn new(
        owner: OwnerId,
        service: Arc<SlotService>,
        scheduler: Arc<Scheduler>,
        monitor: Arc<HeartbeatMonitor>,
        recovery: Arc<RecoveryController>,
        spawner: Arc<dyn ExecutorSpawner>,
        runtime: S,
        settings: CoordinatorSettings,
    ) -> Self {
        let started_at = service.clock().now_ms();
        Self {
            owner,
            ctx: TaskContext {
                service,
                scheduler,
                monitor,
                recovery,
                spawner,
                background: Arc::new(Background::default()),
                salvage_grace: settings.salvage_grace,
            },
            runtime,
            settings,
            started_at,
            rescued: Mutex::new(HashSet::new()),
        }
    }

    /// Owner this coordinator schedules for.
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Shared slot service.
    pub fn service(&self) -> &Arc<SlotService> {
        &self.ctx.service
    }

    /// Dispatcher.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.ctx.scheduler
    }

    /// Watchdogs.
    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.ctx.monitor
    }

    /// Recovery policy engine.
    pub fn recovery(&self) -> &Arc<RecoveryController> {
        &self.ctx.recovery
    }

    /// Background tasks not yet finished.
    pub fn pending_background(&self) -> usize {
        self.ctx.background.pending.load(Ordering::Acquire)
    }

    /// Sweep, recover, dispatch.
    pub async fn tick(&self) -> Result<CoordinatorReport, SlotError> {
        let slots = self.ctx.service.store().list(&self.owner)?;
        let watchdog = self.ctx.monitor.sweep(&slots);
        let mut recoveries_started = 0;

        for event in &watchdog {
            match event {
                WatchdogEvent::LivenessTimeout { token, owner, age_ms, .. } => {
                    audit::record(
                        self.ctx.service.audit(),
                        token,
                        owner,
                        "liveness_timeout",
                        Some(format!("heartbeat age {age_ms}ms")),
                    );
                    self.spawn_recovery(token.clone(), FailureReason::LivenessTimeout);
                }
                WatchdogEvent::GenerationTimeout { token, owner, open_ms } => {
                    audit::record(
                        self.ctx.service.audit(),
                        token,
                        owner,
                        "generation_timeout",
                        Some(format!("open {open_ms}ms")),
                    );
                    self.spawn_salvage(token.clone());
                }
                WatchdogEvent::SalvageExpired { token, .. } => {
                    self.spawn_recovery(token.clone(), FailureReason::SalvageFailed);
                }
            }
            recoveries_started += 1;
        }

        recoveries_started += self.rescue_failed(&slots);

        let tick = self.ctx.scheduler.tick().await?;
        for handle in &tick.orphaned {
            if self.ctx.spawner.abort(handle).await {
                tracing::debug!("aborted orphaned executor {} for {}", handle.id, handle.token);
            }
            self.ctx.monitor.forget(&handle.token);
        }
        for token in &tick.handed_off {
            let reason = slots
                .iter()
                .find(|s| &s.token == token)
                .and_then(|s| s.error_msg.as_deref())
                .map_or_else(
                    || FailureReason::Transient("retrying".into()),
                    FailureReason::classify,
                );
            self.spawn_recovery(token.clone(), reason);
            recoveries_started += 1;
        }

        let pruned = self.ctx.service.prune_controls(self.settings.control_idle_ttl);
        if pruned > 0 {
            tracing::debug!("pruned {} idle control entries", pruned);
        }

        Ok(CoordinatorReport {
            watchdog,
            recoveries_started,
            tick,
        })
    }

    /// Requeue executor-reported transient errors that happened while this
    /// coordinator was running.
    fn rescue_failed(&self, slots: &[Slot]) -> usize {
        let policy = self.ctx.recovery.policy();
        let targets: Vec<(Token, FailureReason)> = {
            let mut rescued = self.rescued.lock();
            let present: HashSet<&Token> = slots.iter().map(|s| &s.token).collect();
            rescued.retain(|t| present.contains(t));

            slots
                .iter()
                .filter(|s| s.status == SlotStatus::Error && s.updated_at >= self.started_at)
                .filter(|s| !self.ctx.recovery.is_busy(&s.token))
                .filter_map(|s| {
                    let reason = FailureReason::classify(s.error_msg.as_deref().unwrap_or_default());
                    (policy.is_retryable(&reason) && rescued.insert(s.token.clone()))
                        .then(|| (s.token.clone(), reason))
                })
                .collect()
        };
        let started = targets.len();
        for (token, reason) in targets {
            tracing::info!("rescuing {} after {}", token, reason);
            self.spawn_recovery(token, reason);
        }
        started
    }

    fn spawn_recovery(&self, token: Token, reason: FailureReason) {
        let ctx = self.ctx.clone();
        ctx.background.enter();
        self.runtime.spawn(async move {
            ctx.recover_and_release(token, reason).await;
            ctx.background.leave();
        });
    }

    fn spawn_salvage(&self, token: Token) {
        let ctx = self.ctx.clone();
        ctx.background.enter();
        self.runtime.spawn(async move {
            ctx.salvage(token).await;
            ctx.background.leave();
        });
    }

    /// Wait until every background salvage/recovery task has finished.
    pub async fn settle(&self) {
        loop {
            let idle = self.ctx.background.idle.notified();
            if self.pending_background() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Tick on the timer, on slot changes for this owner and on config changes,
    /// until `shutdown` flips to `true`. Also keeps the notifier pinging for
    /// as long as it runs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let notifier = self.ctx.service.notifier();
        let mut changes = notifier.subscribe();
        notifier.spawn_pinger(
            &self.runtime,
            self.settings.ping_interval,
            self.ctx.service.clock().clone(),
            shutdown.clone(),
        );
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("coordinator for {} started", self.owner);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                msg = changes.recv() => match msg {
                    Ok(Notification::SlotChanged { owner, .. }) if owner != self.owner => continue,
                    Ok(notification) if !notification.triggers_tick() => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if let Err(err) = self.tick().await {
                tracing::warn!("tick for {} failed: {}", self.owner, err);
            }
        }
        self.settle().await;
        tracing::info!("coordinator for {} stopped", self.owner);
    }

    /// Stop the executor, delete the slot and freeze dispatch briefly.
    pub async fn delete_slot(&self, token: &Token) -> Result<Slot, SlotError> {
        if let Some(handle) = self.ctx.scheduler.handle(token) {
            if self.ctx.spawner.abort(&handle).await {
                self.ctx.service.relinquish(token);
            }
        }
        let removed = self.ctx.service.delete(token, &self.owner).await?;
        self.forget(token);
        self.ctx.scheduler.freeze_for(self.settings.delete_freeze);
        Ok(removed)
    }

    /// Bulk delete by scope and freeze dispatch in proportion.
    pub async fn clear(&self, scope: ClearScope) -> Result<ClearReport, SlotError> {
        let live: Vec<Token> = self
            .ctx
            .service
            .store()
            .list(&self.owner)?
            .into_iter()
            .filter(|s| scope.matches(s) && s.status.has_live_executor())
            .map(|s| s.token)
            .collect();
        for token in &live {
            if let Some(handle) = self.ctx.scheduler.handle(token) {
                if self.ctx.spawner.abort(&handle).await {
                    self.ctx.service.relinquish(token);
                }
            }
        }

        let report = self.ctx.service.clear(&self.owner, scope).await?;
        for token in &report.deleted {
            self.forget(token);
        }
        self.ctx
            .scheduler
            .freeze_for(self.settings.clear_freeze(report.deleted.len()));
        Ok(report)
    }

    /// Change the process-wide limit and reconcile immediately.
    pub async fn set_concurrency_limit(&self, limit: u32) -> Result<CoordinatorReport, SlotError> {
        self.ctx.service.set_concurrency_limit(limit)?;
        self.tick().await
    }

    fn forget(&self, token: &Token) {
        self.ctx.scheduler.forget(token);
        self.ctx.monitor.forget(token);
        self.ctx.recovery.forget(token);
        self.rescued.lock().remove(token);
    }
}
