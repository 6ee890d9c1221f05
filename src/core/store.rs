//! Slot store abstraction.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SlotError;
use super::slot::{NewSlot, OwnerId, Slot, SlotStatus, SlotUpdate, Token, TransitionOutcome};

/// Bulk-cleanup selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    /// `done` and `error` slots.
    Done,
    /// Everything not `picked`/`running`.
    All,
    /// Everything not pinned and not `picked`/`running`.
    Others,
    /// Same selection as [`ClearScope::All`].
    NonActive,
}

impl ClearScope {
    /// Whether `slot` falls inside the scope.
    pub const fn matches(self, slot: &Slot) -> bool {
        match self {
            Self::Done => slot.status.is_terminal(),
            Self::All | Self::NonActive => !slot.status.is_active(),
            Self::Others => !slot.pinned && !slot.status.is_active(),
        }
    }
}

impl FromStr for ClearScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "done" => Ok(Self::Done),
            "all" => Ok(Self::All),
            "others" => Ok(Self::Others),
            "nonactive" | "non_active" => Ok(Self::NonActive),
            other => Err(format!("unknown clear scope `{other}`")),
        }
    }
}

/// Result of [`SlotStore::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The slot is now `picked`.
    Admitted(Slot),
    /// The owner already has `active` slots at or above the limit.
    Full {
        /// Store-level active count.
        active: usize,
    },
    /// Somebody else moved the slot first.
    NotWaiting(SlotStatus),
}

/// Authoritative slot registry.
///
/// Implementations hold the transition contract from
/// [`SlotTable`](super::table::SlotTable) and publish a change notification
/// after every successful mutation. Heartbeats are not announced.
pub trait SlotStore: Send + Sync + 'static {
    /// Insert a `waiting` slot.
    fn create(&self, new: NewSlot) -> Result<Slot, SlotError>;

    /// Apply a status change; late or regressing writes come back as
    /// [`TransitionOutcome::Ignored`].
    fn transition(
        &self,
        token: &Token,
        to: SlotStatus,
        update: SlotUpdate,
    ) -> Result<TransitionOutcome, SlotError>;

    /// Executor claim (`waiting -> picked`, `opened_at` once).
    fn claim(&self, token: &Token) -> Result<Slot, SlotError>;

    /// Check-and-set `waiting -> picked` bounded by `owner_limit`.
    fn admit(&self, token: &Token, owner_limit: u32) -> Result<Admission, SlotError>;

    /// Roll back an admission that never reached an executor.
    fn revert_admission(&self, token: &Token) -> Result<bool, SlotError>;

    /// Update heartbeat fields only.
    fn touch_heartbeat(&self, token: &Token, rtt_ms: Option<u64>) -> Result<Slot, SlotError>;

    /// Single slot.
    fn get(&self, token: &Token) -> Result<Slot, SlotError>;

    /// Owner's slots, pinned first then most recent.
    fn list(&self, owner: &OwnerId) -> Result<Vec<Slot>, SlotError>;

    /// All slots in insertion order.
    fn snapshot(&self) -> Result<Vec<Slot>, SlotError>;

    /// Pin or unpin a slot.
    fn set_pinned(&self, token: &Token, owner: &OwnerId, pinned: bool)
        -> Result<Slot, SlotError>;

    /// Replace `old` with a fresh `waiting` slot under `new_token`, carrying
    /// its owner, title, payload, pin and requeue count. `None` when `old` is
    /// already gone or `done`; only one caller ever gets `Some` for a token.
    fn requeue(
        &self,
        old: &Token,
        new_token: Token,
        marker: &str,
    ) -> Result<Option<Slot>, SlotError>;

    /// Remove a slot.
    fn delete(&self, token: &Token, owner: &OwnerId) -> Result<Slot, SlotError>;

    /// Remove every slot of `owner` in `scope`, except `keep`.
    fn clear(
        &self,
        owner: &OwnerId,
        scope: ClearScope,
        keep: &HashSet<Token>,
    ) -> Result<Vec<Slot>, SlotError>;
}
