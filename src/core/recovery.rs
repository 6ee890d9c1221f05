//! Failure classification and the requeue-as-new-slot recovery path.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::audit;
use super::error::SlotError;
use super::service::{CANNOT_CLOSE_ON_DELETE, CLOSED_BY_USER, DELETED_BY_USER};
use super::slot::{Slot, SlotStatus, SlotUpdate, Token};
use crate::util::ids::new_token;

/// Reason recorded for a liveness timeout.
pub const HB_TIMEOUT: &str = "hb-timeout";
/// Reason recorded when salvage after a generation timeout failed.
pub const TIMEOUT_SALVAGE_FAILED: &str = "timeout-salvage-failed";
/// Suffix on the reason of a slot replaced by a requeue.
pub const REQUEUE_SUFFIX: &str = "→requeue-as-new";
/// Prefix on the reason of a slot whose retry budget ran out.
pub const RETRY_BUDGET_EXHAUSTED: &str = "retry-budget-exhausted";
/// Reason recorded when a requeue finds nothing to resubmit.
pub const REQUEUE_EMPTY_PAYLOAD: &str = "requeue-empty-payload";

/// Why a slot needs recovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// Executor vanished. Terminal, never retried.
    LivenessTimeout,
    /// Generation ran too long and salvage did not finish it.
    SalvageFailed,
    /// The user closed or deleted the slot.
    Cancelled(String),
    /// Unrecoverable protocol failure or an exhausted lineage.
    NonRetryable(String),
    /// Anything else the executor reported.
    Transient(String),
}

impl FailureReason {
    /// Classify a recorded `error_msg`.
    pub fn classify(message: &str) -> Self {
        let msg = message.trim();
        if msg.contains(REQUEUE_SUFFIX) || msg.starts_with(RETRY_BUDGET_EXHAUSTED) {
            return Self::NonRetryable(msg.to_string());
        }
        if msg.starts_with(HB_TIMEOUT) {
            return Self::LivenessTimeout;
        }
        if msg.starts_with("timeout-salvage") {
            return Self::SalvageFailed;
        }
        if [CLOSED_BY_USER, DELETED_BY_USER, CANNOT_CLOSE_ON_DELETE].contains(&msg) {
            return Self::Cancelled(msg.to_string());
        }
        if msg.starts_with("fatal:") || msg.starts_with("protocol:") {
            return Self::NonRetryable(msg.to_string());
        }
        Self::Transient(msg.to_string())
    }

    /// Stable short tag, used as the idempotence key.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::LivenessTimeout => HB_TIMEOUT,
            Self::SalvageFailed => TIMEOUT_SALVAGE_FAILED,
            Self::Cancelled(_) => "cancelled",
            Self::NonRetryable(_) => "non-retryable",
            Self::Transient(_) => "transient",
        }
    }

    /// Text recorded on the slot.
    pub fn message(&self) -> &str {
        match self {
            Self::LivenessTimeout => HB_TIMEOUT,
            Self::SalvageFailed => TIMEOUT_SALVAGE_FAILED,
            Self::Cancelled(m) | Self::NonRetryable(m) | Self::Transient(m) => m,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Requeues allowed per lineage.
    pub retry_budget: u32,
    /// Treat a failed salvage as retryable.
    pub retry_after_salvage_failure: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 2,
            retry_after_salvage_failure: false,
        }
    }
}

impl RecoveryPolicy {
    /// Whether `reason` may lead to a requeue.
    pub const fn is_retryable(&self, reason: &FailureReason) -> bool {
        match reason {
            FailureReason::Transient(_) => true,
            FailureReason::SalvageFailed => self.retry_after_salvage_failure,
            FailureReason::LivenessTimeout
            | FailureReason::Cancelled(_)
            | FailureReason::NonRetryable(_) => false,
        }
    }
}

/// What [`RecoveryController::recover`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Slot marked terminal `error`.
    Failed {
        /// Recorded reason.
        reason: String,
    },
    /// Old token replaced by a fresh `waiting` slot.
    Requeued {
        /// Deleted token.
        old: Token,
        /// New token.
        new: Token,
    },
    /// The lineage used its whole retry budget.
    Exhausted {
        /// Requeues already spent.
        attempts: u32,
    },
    /// This cause was already handled for the token.
    AlreadyHandled,
    /// Another recovery on the token is in progress.
    Busy,
    /// The slot no longer exists.
    Vanished,
    /// Nothing to do (the slot completed).
    Skipped,
}

struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<Token>>,
    token: Token,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.token);
    }
}

/// Maps failure reasons to terminal errors or requeues.
pub struct RecoveryController {
    service: Arc<super::SlotService>,
    policy: RecoveryPolicy,
    busy: Mutex<HashSet<Token>>,
    handled: Mutex<HashSet<(Token, &'static str)>>,
}

impl RecoveryController {
    /// Controller acting through `service`.
    pub fn new(service: Arc<super::SlotService>, policy: RecoveryPolicy) -> Self {
        Self {
            service,
            policy,
            busy: Mutex::new(HashSet::new()),
            handled: Mutex::new(HashSet::new()),
        }
    }

    /// Active policy.
    pub const fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    /// Requeues spent by the lineage that `token` belongs to.
    ///
    /// The count travels on the slot itself, so every coordinator sharing
    /// the store sees the same budget.
    pub fn attempts(&self, token: &Token) -> u32 {
        self.service
            .store()
            .get(token)
            .map(|slot| slot.requeues)
            .unwrap_or(0)
    }

    /// Whether a recovery for `token` is running.
    pub fn is_busy(&self, token: &Token) -> bool {
        self.busy.lock().contains(token)
    }

    /// Handle a failure on `token`.
    pub fn recover(
        &self,
        token: &Token,
        reason: FailureReason,
    ) -> Result<RecoveryOutcome, SlotError> {
        if !self.busy.lock().insert(token.clone()) {
            return Ok(RecoveryOutcome::Busy);
        }
        let _guard = BusyGuard {
            busy: &self.busy,
            token: token.clone(),
        };

        if !self.handled.lock().insert((token.clone(), reason.tag())) {
            return Ok(RecoveryOutcome::AlreadyHandled);
        }

        let slot = match self.service.store().get(token) {
            Ok(slot) => slot,
            Err(SlotError::NotFound(_)) => return Ok(RecoveryOutcome::Vanished),
            Err(err) => return Err(err),
        };
        if slot.status == SlotStatus::Done {
            return Ok(RecoveryOutcome::Skipped);
        }
        if slot.status == SlotStatus::Error {
            let recorded = slot.error_msg.clone().unwrap_or_default();
            if !self.policy.is_retryable(&FailureReason::classify(&recorded)) {
                return Ok(RecoveryOutcome::Failed { reason: recorded });
            }
        }

        if !self.policy.is_retryable(&reason) {
            tracing::info!("{} failed without retry: {}", token, reason);
            let recorded = self.fail(&slot, reason.message())?;
            return Ok(RecoveryOutcome::Failed { reason: recorded });
        }

        let attempts = slot.requeues;
        if attempts >= self.policy.retry_budget {
            tracing::warn!(
                "{} exhausted its retry budget ({}) on {}",
                token,
                attempts,
                reason
            );
            self.fail(&slot, &format!("{RETRY_BUDGET_EXHAUSTED}: {}", reason.message()))?;
            return Ok(RecoveryOutcome::Exhausted { attempts });
        }

        self.requeue(&slot, &reason)
    }

    /// Drop idempotence markers for a token that is gone.
    pub fn forget(&self, token: &Token) {
        self.handled.lock().retain(|(t, _)| t != token);
    }

    fn fail(&self, slot: &Slot, message: &str) -> Result<String, SlotError> {
        let now = self.service.clock().now_ms();
        self.service.control().request_close(&slot.token, now);
        audit::record(
            self.service.audit(),
            &slot.token,
            &slot.owner,
            "fail",
            Some(message.to_string()),
        );
        // Replaces an earlier `error` reason too.
        let outcome = self.service.store().transition(
            &slot.token,
            SlotStatus::Error,
            SlotUpdate::error(message),
        )?;
        Ok(match outcome {
            super::TransitionOutcome::Applied(updated) => {
                updated.error_msg.unwrap_or_else(|| message.to_string())
            }
            super::TransitionOutcome::Ignored { .. } => slot
                .error_msg
                .clone()
                .unwrap_or_else(|| message.to_string()),
        })
    }

    fn requeue(&self, slot: &Slot, reason: &FailureReason) -> Result<RecoveryOutcome, SlotError> {
        if slot.payload_in.trim().is_empty() {
            let recorded = self.fail(slot, REQUEUE_EMPTY_PAYLOAD)?;
            return Ok(RecoveryOutcome::Failed { reason: recorded });
        }
        let now = self.service.clock().now_ms();
        self.service.control().request_close(&slot.token, now);

        let marker = format!("{}{REQUEUE_SUFFIX}", reason.message());
        let Some(fresh) = self
            .service
            .store()
            .requeue(&slot.token, new_token(), &marker)?
        else {
            tracing::debug!("{} was replaced or removed by someone else", slot.token);
            return Ok(RecoveryOutcome::Vanished);
        };
        self.service.forget_token(&slot.token);
        if fresh.pinned {
            self.service.control().request_focus(&fresh.token, now);
        }

        audit::record(
            self.service.audit(),
            &slot.token,
            &slot.owner,
            "requeue",
            Some(format!("{} -> {} ({})", slot.token, fresh.token, reason.tag())),
        );
        tracing::info!(
            "requeued {} as {} after {} (attempt {})",
            slot.token,
            fresh.token,
            reason,
            fresh.requeues
        );
        Ok(RecoveryOutcome::Requeued {
            old: slot.token.clone(),
            new: fresh.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(FailureReason::classify("hb-timeout"), FailureReason::LivenessTimeout);
        assert_eq!(
            FailureReason::classify("timeout-salvage-failed"),
            FailureReason::SalvageFailed
        );
        assert!(matches!(
            FailureReason::classify("closed-by-user"),
            FailureReason::Cancelled(_)
        ));
        assert!(matches!(
            FailureReason::classify("network hiccup→requeue-as-new"),
            FailureReason::NonRetryable(_)
        ));
        assert!(matches!(
            FailureReason::classify("fatal: bad prompt"),
            FailureReason::NonRetryable(_)
        ));
        assert_eq!(
            FailureReason::classify(" network hiccup "),
            FailureReason::Transient("network hiccup".into())
        );
    }

    #[test]
    fn policy_controls_salvage_retries() {
        let strict = RecoveryPolicy::default();
        assert!(!strict.is_retryable(&FailureReason::SalvageFailed));
        assert!(!strict.is_retryable(&FailureReason::LivenessTimeout));
        assert!(strict.is_retryable(&FailureReason::Transient("x".into())));

        let lenient = RecoveryPolicy {
            retry_after_salvage_failure: true,
            ..strict
        };
        assert!(lenient.is_retryable(&FailureReason::SalvageFailed));
    }
}
