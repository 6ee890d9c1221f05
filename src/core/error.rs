//! Error types for slot store and scheduler operations.

use thiserror::Error;

use super::slot::{SlotStatus, Token};

/// Errors produced by slot scheduling components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// A slot with this token already exists with a different payload.
    #[error("duplicate token: {0}")]
    DuplicateToken(Token),
    /// The requested status change would violate terminal-state rules.
    ///
    /// Stores absorb this into an ignored transition; it only escapes from
    /// the transition validator itself.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Status currently recorded.
        from: SlotStatus,
        /// Status that was requested.
        to: SlotStatus,
    },
    /// The caller does not own the slot.
    #[error("forbidden: slot {0} belongs to another owner")]
    Forbidden(Token),
    /// No slot with this token exists, or it is already finished.
    #[error("slot not found: {0}")]
    NotFound(Token),
    /// The live executor did not confirm it let go of the slot in time.
    #[error("executor for {0} did not relinquish in time")]
    RelinquishTimeout(Token),
    /// Concurrency limit outside `0..=hard_cap`.
    #[error("concurrency limit {requested} out of range (hard cap {hard_cap})")]
    LimitOutOfRange {
        /// Requested value.
        requested: u32,
        /// Configured ceiling.
        hard_cap: u32,
    },
    /// The executor spawner could not start an executor.
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// Backend-specific storage failure with context.
    #[error("storage error: {0}")]
    Storage(String),
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
