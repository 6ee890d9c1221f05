//! Capacity-bounded FIFO dispatcher.
//!
//! One [`Scheduler`] exists per owner per process. Each tick reads the
//! owner's slots, works out spare capacity against the process-wide limit
//! and hands the oldest `waiting` slots to the [`ExecutorSpawner`].
//!
//! Two layers keep the active set under the limit:
//!
//! - local reservations cover the window between choosing a slot and the
//!   spawner returning, within one scheduler;
//! - [`SlotStore::admit`](super::SlotStore::admit) re-checks the persisted
//!   active count, so independent schedulers sharing a store cannot
//!   overshoot either.
//!
//! Ticks are single-flight. A tick requested while one runs sets a flag and
//! returns immediately; the running tick then does exactly one more pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::audit;
use super::error::SlotError;
use super::executor::{DispatchRequest, ExecutorHandle, ExecutorSpawner};
use super::service::SlotService;
use super::slot::{OwnerId, Slot, SlotStatus, Token};
use super::store::Admission;

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A freeze window is active.
    Frozen,
    /// The limit is 0.
    CoordinationOnly,
}

/// Result of dispatching a single slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Executor started; the slot is `picked`.
    Dispatched(ExecutorHandle),
    /// The store-level active set is already at the limit.
    CapacityExhausted {
        /// Active count seen by the store.
        active: usize,
    },
    /// Another scheduler or executor moved the slot first.
    NotWaiting(SlotStatus),
    /// The slot was deleted meanwhile.
    Vanished,
    /// The spawner refused; the slot went back to `waiting`.
    SpawnFailed(SlotError),
}

/// Summary of one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tokens moved to `picked`.
    pub dispatched: Vec<Token>,
    /// `retrying` tokens handed to recovery.
    pub handed_off: Vec<Token>,
    /// Tokens whose spawn failed.
    pub spawn_failures: Vec<Token>,
    /// Executors whose slot disappeared without going through [`Scheduler::forget`].
    pub orphaned: Vec<ExecutorHandle>,
    /// Set when the last pass skipped.
    pub skipped: Option<SkipReason>,
    /// Capacity ran out with candidates left.
    pub capacity_exhausted: bool,
    /// This call found a tick in flight and only queued a follow-up.
    pub coalesced: bool,
    /// Extra passes run for coalesced requests.
    pub follow_ups: u32,
}

#[derive(Debug, Default)]
struct SchedulerState {
    reservations: HashSet<Token>,
    order: HashMap<Token, u64>,
    next_order: u64,
    requeued_once: HashSet<Token>,
    handles: HashMap<Token, ExecutorHandle>,
    freeze_until: Option<u128>,
}

/// Per-owner dispatcher.
pub struct Scheduler {
    owner: OwnerId,
    service: Arc<SlotService>,
    spawner: Arc<dyn ExecutorSpawner>,
    dispatch_delay: Duration,
    state: Mutex<SchedulerState>,
    in_flight: AtomicBool,
    follow_up: AtomicBool,
}

impl Scheduler {
    /// Scheduler for `owner`.
    pub fn new(
        owner: OwnerId,
        service: Arc<SlotService>,
        spawner: Arc<dyn ExecutorSpawner>,
        dispatch_delay: Duration,
    ) -> Self {
        Self {
            owner,
            service,
            spawner,
            dispatch_delay,
            state: Mutex::new(SchedulerState::default()),
            in_flight: AtomicBool::new(false),
            follow_up: AtomicBool::new(false),
        }
    }

    /// Owner this scheduler dispatches for.
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Run a dispatch tick, or coalesce into the one already running.
    pub async fn tick(&self) -> Result<TickReport, SlotError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.follow_up.store(true, Ordering::Release);
            return Ok(TickReport {
                coalesced: true,
                ..TickReport::default()
            });
        }

        let mut report = TickReport::default();
        loop {
            if let Err(err) = self.run_pass(&mut report).await {
                self.in_flight.store(false, Ordering::Release);
                return Err(err);
            }
            if self.follow_up.swap(false, Ordering::AcqRel) {
                report.follow_ups += 1;
                continue;
            }
            self.in_flight.store(false, Ordering::Release);
            // A request can land between the swap above and the release.
            if self.follow_up.load(Ordering::Acquire) && !self.in_flight.swap(true, Ordering::AcqRel) {
                self.follow_up.store(false, Ordering::Release);
                report.follow_ups += 1;
                continue;
            }
            return Ok(report);
        }
    }

    async fn run_pass(&self, report: &mut TickReport) -> Result<(), SlotError> {
        let now = self.service.clock().now_ms();
        let limit = self.service.concurrency_limit();
        report.skipped = None;
        report.capacity_exhausted = false;

        if self.is_frozen(now) {
            tracing::debug!("scheduler for {} frozen", self.owner);
            report.skipped = Some(SkipReason::Frozen);
            return Ok(());
        }
        if limit == 0 {
            report.skipped = Some(SkipReason::CoordinationOnly);
            return Ok(());
        }

        let slots = self.service.store().list(&self.owner)?;
        let (mut capacity, candidates) = {
            let mut state = self.state.lock();
            self.observe(&mut state, &slots, report);

            let mut active: HashSet<&Token> = slots
                .iter()
                .filter(|s| s.status.is_active())
                .map(|s| &s.token)
                .collect();
            active.extend(state.reservations.iter());
            let capacity = (limit as usize).saturating_sub(active.len());

            let control = self.service.control();
            let mut candidates: Vec<&Slot> = slots
                .iter()
                .filter(|s| s.status == SlotStatus::Waiting)
                .filter(|s| !state.reservations.contains(&s.token))
                .filter(|s| !control.is_close_requested(&s.token))
                .collect();
            candidates.sort_by_key(|s| state.order.get(&s.token).copied().unwrap_or(u64::MAX));
            let candidates: Vec<Slot> = candidates.into_iter().cloned().collect();
            (capacity, candidates)
        };

        if capacity == 0 {
            report.capacity_exhausted = !candidates.is_empty();
            return Ok(());
        }

        let mut first = true;
        for slot in candidates {
            if capacity == 0 {
                report.capacity_exhausted = true;
                break;
            }
            if !first && !self.dispatch_delay.is_zero() {
                tokio::time::sleep(self.dispatch_delay).await;
            }
            first = false;

            match self.dispatch_one(&slot, limit).await {
                DispatchOutcome::Dispatched(_) => {
                    capacity -= 1;
                    report.dispatched.push(slot.token);
                }
                DispatchOutcome::CapacityExhausted { .. } => {
                    report.capacity_exhausted = true;
                    break;
                }
                DispatchOutcome::SpawnFailed(_) => report.spawn_failures.push(slot.token),
                DispatchOutcome::NotWaiting(_) | DispatchOutcome::Vanished => {}
            }
        }
        Ok(())
    }

    /// Record first-seen order, drop stale reservations and pick up `retrying` slots.
    fn observe(&self, state: &mut SchedulerState, slots: &[Slot], report: &mut TickReport) {
        let mut fresh: Vec<&Slot> = slots
            .iter()
            .filter(|s| s.status == SlotStatus::Waiting && !state.order.contains_key(&s.token))
            .collect();
        fresh.sort_by_key(|s| s.seq);
        for slot in fresh {
            let order = state.next_order;
            state.next_order += 1;
            state.order.insert(slot.token.clone(), order);
        }

        let waiting: HashSet<&Token> = slots
            .iter()
            .filter(|s| s.status == SlotStatus::Waiting)
            .map(|s| &s.token)
            .collect();
        state.reservations.retain(|t| waiting.contains(t));
        state.order.retain(|t, _| waiting.contains(t));

        let present: HashSet<&Token> = slots.iter().map(|s| &s.token).collect();
        state.requeued_once.retain(|t| present.contains(t));
        // Terminal slots keep their handle until released; gone ones hand it back.
        let gone: Vec<Token> = state
            .handles
            .keys()
            .filter(|t| !present.contains(t))
            .cloned()
            .collect();
        for token in gone {
            if let Some(handle) = state.handles.remove(&token) {
                report.orphaned.push(handle);
            }
        }

        for slot in slots.iter().filter(|s| s.status == SlotStatus::Retrying) {
            if state.requeued_once.insert(slot.token.clone()) {
                tracing::info!("{} is retrying; handing to recovery", slot.token);
                report.handed_off.push(slot.token.clone());
            }
        }
    }

    /// Reserve, admit and spawn one slot.
    pub async fn dispatch_one(&self, slot: &Slot, limit: u32) -> DispatchOutcome {
        let token = &slot.token;
        if !self.state.lock().reservations.insert(token.clone()) {
            return DispatchOutcome::NotWaiting(slot.status);
        }

        let outcome = match self.service.store().admit(token, limit) {
            Ok(Admission::Admitted(admitted)) => self.spawn_admitted(&admitted).await,
            Ok(Admission::Full { active }) => DispatchOutcome::CapacityExhausted { active },
            Ok(Admission::NotWaiting(status)) => DispatchOutcome::NotWaiting(status),
            Err(SlotError::NotFound(_)) => DispatchOutcome::Vanished,
            Err(err) => {
                tracing::error!("admission of {} failed: {}", token, err);
                DispatchOutcome::SpawnFailed(err)
            }
        };

        self.state.lock().reservations.remove(token);
        outcome
    }

    async fn spawn_admitted(&self, slot: &Slot) -> DispatchOutcome {
        let request = DispatchRequest {
            token: slot.token.clone(),
            owner: slot.owner.clone(),
            title: slot.title.clone(),
            payload: slot.payload_in.clone(),
        };
        match self.spawner.spawn(&request).await {
            Ok(handle) => {
                tracing::info!("dispatched {} ({})", slot.token, handle.id);
                audit::record(
                    self.service.audit(),
                    &slot.token,
                    &slot.owner,
                    "dispatch",
                    Some(handle.id.clone()),
                );
                self.state
                    .lock()
                    .handles
                    .insert(slot.token.clone(), handle.clone());
                DispatchOutcome::Dispatched(handle)
            }
            Err(err) => {
                tracing::warn!("spawn for {} failed: {}", slot.token, err);
                if let Err(revert) = self.service.store().revert_admission(&slot.token) {
                    tracing::warn!("could not revert admission of {}: {}", slot.token, revert);
                }
                audit::record(
                    self.service.audit(),
                    &slot.token,
                    &slot.owner,
                    "spawn_failed",
                    Some(err.to_string()),
                );
                DispatchOutcome::SpawnFailed(err)
            }
        }
    }

    /// Skip dispatch until `now + duration`.
    pub fn freeze_for(&self, duration: Duration) {
        let until = self.service.clock().now_ms() + duration.as_millis();
        let mut state = self.state.lock();
        state.freeze_until = Some(state.freeze_until.map_or(until, |u| u.max(until)));
        tracing::debug!("scheduler for {} frozen for {:?}", self.owner, duration);
    }

    /// Whether a freeze window covers `now_ms`.
    pub fn is_frozen(&self, now_ms: u128) -> bool {
        self.state.lock().freeze_until.is_some_and(|until| now_ms < until)
    }

    /// Executor handle for a dispatched token.
    pub fn handle(&self, token: &Token) -> Option<ExecutorHandle> {
        self.state.lock().handles.get(token).cloned()
    }

    /// Drop local state for a token, returning its handle.
    pub fn forget(&self, token: &Token) -> Option<ExecutorHandle> {
        let mut state = self.state.lock();
        state.order.remove(token);
        state.reservations.remove(token);
        state.requeued_once.remove(token);
        state.handles.remove(token)
    }

    /// Tokens currently reserved.
    pub fn reservations(&self) -> usize {
        self.state.lock().reservations.len()
    }
}
