//! Executor- and client-facing operations over a [`SlotStore`].
//!
//! [`SlotService`] is the only thing that talks to the store on behalf of
//! callers outside the scheduling core. It layers on top of the raw store:
//!
//! - the process-wide concurrency limit and its broadcast,
//! - heartbeat session validation and RTT sanitizing,
//! - close/focus advisories for executors,
//! - the bounded relinquish wait that guards deletion.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audit::{self, SharedAuditSink};
use super::control::{Advisories, ControlBoard, PokeAction};
use super::error::SlotError;
use super::heartbeat::{SessionRegistry, SessionVerdict, WorkerSession};
use super::notifier::{Notification, Notifier};
use super::slot::{NewSlot, OwnerId, Slot, SlotStatus, SlotUpdate, SlotView, Token, TransitionOutcome};
use super::store::{ClearScope, SlotStore};
use crate::util::clock::Clock;
use crate::util::ids::new_token;

/// Reason recorded when a client closes a running slot.
pub const CLOSED_BY_USER: &str = "closed-by-user";
/// Reason recorded on a slot deleted after its executor let go.
pub const DELETED_BY_USER: &str = "deleted-by-user";
/// Reason recorded when deletion could not confirm the executor stopped.
pub const CANNOT_CLOSE_ON_DELETE: &str = "cannot-close-on-delete";
/// Round-trip times at or above this are discarded.
pub const MAX_RTT_MS: i64 = 120_000;

/// Tunables for [`SlotService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Initial concurrency limit.
    pub concurrency_limit: u32,
    /// Highest accepted limit.
    pub hard_cap: u32,
    /// How long deletion waits for an executor to let go.
    pub relinquish_wait: Duration,
    /// Minimum spacing between focus pokes.
    pub focus_throttle: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            hard_cap: 8,
            relinquish_wait: Duration::from_millis(1_200),
            focus_throttle: Duration::from_millis(1_500),
        }
    }
}

/// Client submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Client-chosen token; generated when absent.
    pub token: Option<Token>,
    /// Display title.
    pub title: String,
    /// Task input.
    pub payload: String,
}

/// Executor report body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBody {
    /// Output on `done`, reason on `retrying`/`error`.
    pub text: Option<String>,
    /// Progress percentage.
    pub progress: Option<u32>,
}

/// Reply to an executor report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    /// Whether the slot changed.
    pub applied: bool,
    /// Status after the report.
    pub status: SlotStatus,
    /// Advisory flags.
    #[serde(flatten)]
    pub advisories: Advisories,
}

/// Executor heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    /// Session and sequence number, if the executor sends them.
    pub session: Option<WorkerSession>,
    /// Measured round-trip time.
    pub rtt_ms: Option<i64>,
}

/// Reply to a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Whether liveness fields were updated.
    pub accepted: bool,
    /// Current status; `None` if the slot is gone.
    pub status: Option<SlotStatus>,
    /// The slot is terminal or gone.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Advisory flags.
    #[serde(flatten)]
    pub advisories: Advisories,
}

/// Outcome of a bulk clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    /// Removed tokens.
    pub deleted: Vec<Token>,
    /// Tokens kept because their executor did not let go.
    pub refused: Vec<Token>,
}

/// Slot operations shared by executors, clients and coordinators.
pub struct SlotService {
    store: Arc<dyn SlotStore>,
    notifier: Notifier,
    control: ControlBoard,
    sessions: SessionRegistry,
    limit: AtomicU32,
    hard_cap: u32,
    relinquish_wait: Duration,
    clock: Arc<dyn Clock>,
    audit: SharedAuditSink,
}

impl SlotService {
    /// Service over `store`. `notifier` must be the one the store publishes to.
    pub fn new(
        store: Arc<dyn SlotStore>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        options: ServiceOptions,
        audit: SharedAuditSink,
    ) -> Self {
        Self {
            store,
            notifier,
            control: ControlBoard::new(options.focus_throttle),
            sessions: SessionRegistry::new(),
            limit: AtomicU32::new(options.concurrency_limit.min(options.hard_cap)),
            hard_cap: options.hard_cap,
            relinquish_wait: options.relinquish_wait,
            clock,
            audit,
        }
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    /// Change bus.
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Advisory board.
    pub const fn control(&self) -> &ControlBoard {
        &self.control
    }

    /// Heartbeat sessions.
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Injected clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Audit sink.
    pub fn audit(&self) -> &SharedAuditSink {
        &self.audit
    }

    /// Current concurrency limit.
    pub fn concurrency_limit(&self) -> u32 {
        self.limit.load(Ordering::Acquire)
    }

    /// Configured ceiling for the limit.
    pub const fn hard_cap(&self) -> u32 {
        self.hard_cap
    }

    /// Change the limit and tell every observer.
    pub fn set_concurrency_limit(&self, limit: u32) -> Result<u32, SlotError> {
        if limit > self.hard_cap {
            return Err(SlotError::LimitOutOfRange {
                requested: limit,
                hard_cap: self.hard_cap,
            });
        }
        let previous = self.limit.swap(limit, Ordering::AcqRel);
        tracing::info!("concurrency limit {} -> {}", previous, limit);
        self.notifier.publish(Notification::ConfigChanged {
            concurrency_limit: limit,
        });
        Ok(limit)
    }

    // ---- client side ----

    /// Create a `waiting` slot and pin it.
    pub fn submit(&self, owner: &OwnerId, submission: Submission) -> Result<Slot, SlotError> {
        let token = submission.token.unwrap_or_else(new_token);
        let slot = self.store.create(NewSlot {
            token: token.clone(),
            owner: owner.clone(),
            title: submission.title,
            payload: submission.payload,
        })?;
        tracing::info!("submitted {} for {}", token, owner);
        self.set_pinned(&token, owner, true)
            .or_else(|err| match err {
                SlotError::NotFound(_) => Ok(slot),
                other => Err(other),
            })
    }

    /// Owner's slots with derived liveness figures.
    pub fn list(&self, owner: &OwnerId) -> Result<Vec<SlotView>, SlotError> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .list(owner)?
            .iter()
            .map(|slot| SlotView::from_slot(slot, now))
            .collect())
    }

    /// One slot, owner-checked.
    pub fn get(&self, token: &Token, owner: &OwnerId) -> Result<Slot, SlotError> {
        let slot = self.store.get(token)?;
        if &slot.owner == owner {
            Ok(slot)
        } else {
            Err(SlotError::Forbidden(token.clone()))
        }
    }

    /// Pin or unpin; pinning also queues a focus poke.
    pub fn set_pinned(&self, token: &Token, owner: &OwnerId, pinned: bool) -> Result<Slot, SlotError> {
        let slot = self.store.set_pinned(token, owner, pinned)?;
        if pinned {
            self.control.request_focus(token, self.clock.now_ms());
        }
        Ok(slot)
    }

    /// Focus or close a slot's executor.
    pub fn poke(&self, token: &Token, owner: &OwnerId, action: PokeAction) -> Result<Slot, SlotError> {
        let slot = self.get(token, owner)?;
        let now = self.clock.now_ms();
        match action {
            PokeAction::Focus => {
                self.control.request_focus(token, now);
                Ok(slot)
            }
            PokeAction::Close => {
                self.control.request_close(token, now);
                if slot.status.is_terminal() {
                    return Ok(slot);
                }
                audit::record(&self.audit, token, owner, "close", None);
                match self
                    .store
                    .transition(token, SlotStatus::Error, SlotUpdate::error(CLOSED_BY_USER))?
                {
                    TransitionOutcome::Applied(updated) => Ok(updated),
                    TransitionOutcome::Ignored { .. } => self.store.get(token),
                }
            }
        }
    }

    /// Delete a slot, first asking a live executor to let go.
    ///
    /// If the executor does not confirm within the relinquish wait, the slot
    /// is marked `error: cannot-close-on-delete` and kept.
    pub async fn delete(&self, token: &Token, owner: &OwnerId) -> Result<Slot, SlotError> {
        let slot = self.get(token, owner)?;
        if slot.status.has_live_executor() {
            self.control.request_close(token, self.clock.now_ms());
            let released = self
                .control
                .wait_relinquished(token, self.relinquish_wait, self.clock.now_ms())
                .await;
            if !released {
                tracing::warn!("executor for {} did not relinquish; keeping slot", token);
                self.store.transition(
                    token,
                    SlotStatus::Error,
                    SlotUpdate::error(CANNOT_CLOSE_ON_DELETE),
                )?;
                audit::record(&self.audit, token, owner, "delete_refused", None);
                return Err(SlotError::RelinquishTimeout(token.clone()));
            }
            self.store
                .transition(token, SlotStatus::Error, SlotUpdate::error(DELETED_BY_USER))?;
        }
        let removed = self.store.delete(token, owner)?;
        self.forget_token(token);
        audit::record(&self.audit, token, owner, "delete", None);
        tracing::info!("deleted {}", token);
        Ok(removed)
    }

    /// Bulk delete by scope, skipping slots whose executor does not let go.
    pub async fn clear(&self, owner: &OwnerId, scope: ClearScope) -> Result<ClearReport, SlotError> {
        let mut keep = HashSet::new();
        let live: Vec<Slot> = self
            .store
            .list(owner)?
            .into_iter()
            .filter(|s| scope.matches(s) && s.status.has_live_executor())
            .collect();
        for slot in &live {
            self.control.request_close(&slot.token, self.clock.now_ms());
        }
        for slot in live {
            let released = self
                .control
                .wait_relinquished(&slot.token, self.relinquish_wait, self.clock.now_ms())
                .await;
            if !released {
                keep.insert(slot.token);
            }
        }

        let removed = self.store.clear(owner, scope, &keep)?;
        let deleted: Vec<Token> = removed.into_iter().map(|s| s.token).collect();
        for token in &deleted {
            self.forget_token(token);
        }
        let mut refused: Vec<Token> = keep.into_iter().collect();
        refused.sort();
        tracing::info!(
            "cleared {} slots for {} ({:?}), {} refused",
            deleted.len(),
            owner,
            scope,
            refused.len()
        );
        Ok(ClearReport { deleted, refused })
    }

    // ---- executor side ----

    /// Executor claim; returns the slot with its payload.
    pub fn claim(&self, token: &Token) -> Result<Slot, SlotError> {
        let slot = self.store.claim(token)?;
        tracing::debug!("claimed {}", token);
        Ok(slot)
    }

    /// Executor state report.
    pub fn report(&self, token: &Token, state: SlotStatus, body: ReportBody) -> Result<ReportAck, SlotError> {
        let update = match state {
            SlotStatus::Done => SlotUpdate {
                output: Some(body.text.unwrap_or_default()),
                progress: body.progress,
                ..SlotUpdate::default()
            },
            SlotStatus::Error | SlotStatus::Retrying => SlotUpdate {
                error_reason: body.text,
                progress: body.progress,
                increment_tries: state == SlotStatus::Retrying,
                ..SlotUpdate::default()
            },
            _ => SlotUpdate {
                progress: body.progress,
                ..SlotUpdate::default()
            },
        };
        let outcome = self.store.transition(token, state, update)?;
        let applied = outcome.is_applied();
        let status = outcome.status();
        if applied {
            tracing::debug!("{} reported {}", token, status);
        }
        let pinned = match &outcome {
            TransitionOutcome::Applied(slot) => slot.pinned,
            TransitionOutcome::Ignored { .. } => self.store.get(token).is_ok_and(|s| s.pinned),
        };
        let advisories = self
            .control
            .advisories(token, pinned, status.is_terminal(), self.clock.now_ms());
        Ok(ReportAck {
            applied,
            status,
            advisories,
        })
    }

    /// Executor heartbeat. Never changes `status`.
    pub fn heartbeat(&self, token: &Token, report: &HeartbeatReport) -> HeartbeatAck {
        let now = self.clock.now_ms();
        let Ok(slot) = self.store.get(token) else {
            return HeartbeatAck {
                accepted: false,
                status: None,
                is_final: true,
                advisories: Advisories {
                    close_requested: true,
                    focus_requested: false,
                },
            };
        };
        let terminal = slot.status.is_terminal();
        let verdict = if terminal {
            SessionVerdict::Superseded
        } else {
            self.sessions.check(token, report.session.as_ref())
        };

        let accepted = verdict.is_accepted()
            && self
                .store
                .touch_heartbeat(token, sanitize_rtt(report.rtt_ms))
                .is_ok();
        if !accepted && !terminal {
            tracing::debug!("heartbeat for {} dropped ({:?})", token, verdict);
        }
        HeartbeatAck {
            accepted,
            status: Some(slot.status),
            is_final: terminal,
            advisories: self.control.advisories(token, slot.pinned, terminal, now),
        }
    }

    /// Executor confirms it stopped working on the slot.
    pub fn relinquish(&self, token: &Token) {
        self.control.mark_relinquished(token, self.clock.now_ms());
        tracing::debug!("{} relinquished", token);
    }

    // ---- housekeeping ----

    /// Drop advisory and session state for a token.
    pub fn forget_token(&self, token: &Token) {
        self.control.forget(token);
        self.sessions.forget(token);
    }

    /// Drop idle advisory entries.
    pub fn prune_controls(&self, idle_ttl: Duration) -> usize {
        self.control.prune(self.clock.now_ms(), idle_ttl)
    }
}

fn sanitize_rtt(rtt_ms: Option<i64>) -> Option<u64> {
    rtt_ms
        .filter(|rtt| (0..MAX_RTT_MS).contains(rtt))
        .and_then(|rtt| u64::try_from(rtt).ok())
}
