//! Slot data model: tokens, statuses, persisted records and read views.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::heartbeat::HeartbeatBand;

/// Longest error message kept on a slot, in characters.
pub const MAX_ERROR_MSG_CHARS: usize = 1000;

/// Reason recorded on a terminal error when the reporter gave none.
pub const UNKNOWN_ERROR: &str = "unknown-error";

/// Opaque slot identifier, generated by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of the submitting principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a slot.
///
/// ```text
/// waiting -> picked -> running -> { retrying -> (new token) waiting | done | error }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Submitted, not yet dispatched.
    Waiting,
    /// Dispatched or claimed by an executor.
    Picked,
    /// Executor is producing output.
    Running,
    /// Transient marker; converted into a fresh slot by recovery.
    Retrying,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Error,
}

impl SlotStatus {
    /// `done` or `error`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Counts against the concurrency limit.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Picked | Self::Running)
    }

    /// A live executor may be attached to the slot.
    pub const fn has_live_executor(self) -> bool {
        matches!(self, Self::Picked | Self::Running | Self::Retrying)
    }

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Picked => "picked",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(Self::Waiting),
            "picked" => Ok(Self::Picked),
            "running" => Ok(Self::Running),
            "retrying" => Ok(Self::Retrying),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown slot status `{other}`")),
        }
    }
}

/// Persisted record of one task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Immutable identifier.
    pub token: Token,
    /// Submitting principal.
    pub owner: OwnerId,
    /// Store-assigned insertion number.
    pub seq: u64,
    /// Display title (opaque).
    pub title: String,
    /// Task input (opaque).
    pub payload_in: String,
    /// Task output, set on `done`.
    pub payload_out: Option<String>,
    /// Current status.
    pub status: SlotStatus,
    /// Number of `retrying` transitions on this token.
    pub tries: u32,
    /// 0..=100, non-decreasing while non-terminal.
    pub progress: u8,
    /// Last known failure reason.
    pub error_msg: Option<String>,
    /// Last heartbeat, ms since epoch.
    pub heartbeat_last_at: Option<u128>,
    /// Last reported round-trip time in ms.
    pub heartbeat_rtt: Option<u64>,
    /// Accepted heartbeats.
    pub heartbeat_count: u64,
    /// First executor claim; the generation-duration anchor.
    pub opened_at: Option<u128>,
    /// Creation time.
    pub created_at: u128,
    /// Last mutation time.
    pub updated_at: u128,
    /// At most one pinned slot per owner.
    pub pinned: bool,
    /// Requeues spent by the chain of slots this one descends from.
    #[serde(default)]
    pub requeues: u32,
}

impl Slot {
    /// Fresh `waiting` slot.
    pub fn new(new: NewSlot, seq: u64, now_ms: u128) -> Self {
        Self {
            token: new.token,
            owner: new.owner,
            seq,
            title: new.title,
            payload_in: new.payload,
            payload_out: None,
            status: SlotStatus::Waiting,
            tries: 0,
            progress: 0,
            error_msg: None,
            heartbeat_last_at: None,
            heartbeat_rtt: None,
            heartbeat_count: 0,
            opened_at: None,
            created_at: now_ms,
            updated_at: now_ms,
            pinned: false,
            requeues: 0,
        }
    }
}

/// Input for [`SlotStore::create`](super::SlotStore::create).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSlot {
    /// Client-generated token.
    pub token: Token,
    /// Submitting principal.
    pub owner: OwnerId,
    /// Display title.
    pub title: String,
    /// Task input.
    pub payload: String,
}

/// Optional fields carried by a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    /// Output text; only kept on `done`.
    pub output: Option<String>,
    /// Failure reason for `retrying`/`error`.
    pub error_reason: Option<String>,
    /// Raw progress; clamped to 100.
    pub progress: Option<u32>,
    /// Bump `tries`; honored only for `retrying`.
    pub increment_tries: bool,
}

impl SlotUpdate {
    /// Update carrying a failure reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Update carrying completed output.
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: Some(text.into()),
            ..Self::default()
        }
    }

    /// Update carrying progress only.
    pub fn progress(value: u32) -> Self {
        Self {
            progress: Some(value),
            ..Self::default()
        }
    }
}

/// Why a transition was absorbed instead of applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreCause {
    /// The target would regress a terminal slot.
    Regression(super::SlotError),
    /// A repeated completion did not carry more complete output.
    IncompleteOutput,
}

/// Result of a status transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The slot changed.
    Applied(Slot),
    /// Late or duplicate delivery; nothing changed.
    Ignored {
        /// Status left in place.
        status: SlotStatus,
        /// Why the request was dropped.
        cause: IgnoreCause,
    },
}

impl TransitionOutcome {
    /// Status after the request, applied or not.
    pub const fn status(&self) -> SlotStatus {
        match self {
            Self::Applied(slot) => slot.status,
            Self::Ignored { status, .. } => *status,
        }
    }

    /// Whether the slot changed.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// List-oriented read model with derived liveness figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// Token.
    pub token: Token,
    /// Title.
    pub title: String,
    /// Status.
    pub status: SlotStatus,
    /// Retry count on this token.
    pub tries: u32,
    /// Progress percentage.
    pub progress: u8,
    /// Last failure reason.
    pub error_msg: Option<String>,
    /// Last round-trip time.
    pub heartbeat_rtt: Option<u64>,
    /// Accepted heartbeats.
    pub heartbeat_count: u64,
    /// Pinned flag.
    pub pinned: bool,
    /// First claim time.
    pub opened_at: Option<u128>,
    /// Creation time.
    pub created_at: u128,
    /// Last mutation.
    pub updated_at: u128,
    /// Heartbeat age; `None` for terminal slots or before the first beat.
    pub hb_age_ms: Option<u128>,
    /// Open duration, frozen at the terminal transition.
    pub runtime_ms: Option<u128>,
    /// Terminal transition time.
    pub ended_at: Option<u128>,
    /// `done` or `error`.
    pub terminal: bool,
    /// Heartbeat health band.
    pub band: HeartbeatBand,
}

impl SlotView {
    /// Project a slot at `now_ms`.
    pub fn from_slot(slot: &Slot, now_ms: u128) -> Self {
        let terminal = slot.status.is_terminal();
        let hb_age_ms = if terminal {
            None
        } else {
            slot.heartbeat_last_at.map(|at| now_ms.saturating_sub(at))
        };
        let end = if terminal { slot.updated_at } else { now_ms };
        let runtime_ms = slot.opened_at.map(|opened| end.saturating_sub(opened));
        Self {
            token: slot.token.clone(),
            title: slot.title.clone(),
            status: slot.status,
            tries: slot.tries,
            progress: slot.progress,
            error_msg: slot.error_msg.clone(),
            heartbeat_rtt: slot.heartbeat_rtt,
            heartbeat_count: slot.heartbeat_count,
            pinned: slot.pinned,
            opened_at: slot.opened_at,
            created_at: slot.created_at,
            updated_at: slot.updated_at,
            hb_age_ms,
            runtime_ms,
            ended_at: terminal.then_some(slot.updated_at),
            terminal,
            band: HeartbeatBand::classify(hb_age_ms),
        }
    }
}

/// Cut a reason down to [`MAX_ERROR_MSG_CHARS`].
pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_ERROR_MSG_CHARS).collect()
}
