//! Advisory flags delivered to executors in heartbeat and report replies.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::slot::Token;

/// Client poke kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PokeAction {
    /// Bring the executor to the foreground.
    Focus,
    /// Ask the executor to stop.
    Close,
}

/// Flags returned to an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisories {
    /// The executor should stop and let go of the slot.
    pub close_requested: bool,
    /// The executor should bring itself to the foreground.
    pub focus_requested: bool,
}

#[derive(Debug)]
struct ControlEntry {
    close_requested: bool,
    focus_pending: bool,
    last_focus_at: Option<u128>,
    relinquished: watch::Sender<bool>,
    touched_at: u128,
}

impl ControlEntry {
    fn new(now_ms: u128) -> Self {
        let (relinquished, _rx) = watch::channel(false);
        Self {
            close_requested: false,
            focus_pending: false,
            last_focus_at: None,
            relinquished,
            touched_at: now_ms,
        }
    }
}

/// Per-token advisory state.
#[derive(Debug)]
pub struct ControlBoard {
    entries: Mutex<HashMap<Token, ControlEntry>>,
    focus_throttle_ms: u128,
}

impl ControlBoard {
    /// Board delivering a focus poke at most once per `focus_throttle`.
    pub fn new(focus_throttle: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            focus_throttle_ms: focus_throttle.as_millis(),
        }
    }

    /// Flag the executor to stop.
    pub fn request_close(&self, token: &Token, now_ms: u128) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(token.clone())
            .or_insert_with(|| ControlEntry::new(now_ms));
        entry.close_requested = true;
        entry.touched_at = now_ms;
    }

    /// Queue a focus poke.
    pub fn request_focus(&self, token: &Token, now_ms: u128) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(token.clone())
            .or_insert_with(|| ControlEntry::new(now_ms));
        entry.focus_pending = true;
        entry.touched_at = now_ms;
    }

    /// Whether a close was requested.
    pub fn is_close_requested(&self, token: &Token) -> bool {
        self.entries
            .lock()
            .get(token)
            .is_some_and(|e| e.close_requested)
    }

    /// Flags for the next reply to the executor.
    ///
    /// Focus is only delivered to pinned, non-terminal slots and consumes the
    /// pending poke. Terminal slots always get `close_requested`.
    pub fn advisories(&self, token: &Token, pinned: bool, terminal: bool, now_ms: u128) -> Advisories {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(token.clone())
            .or_insert_with(|| ControlEntry::new(now_ms));
        entry.touched_at = now_ms;
        if terminal {
            entry.close_requested = true;
        }

        let throttled = entry
            .last_focus_at
            .is_some_and(|at| now_ms.saturating_sub(at) < self.focus_throttle_ms);
        let focus_requested =
            entry.focus_pending && pinned && !terminal && !entry.close_requested && !throttled;
        if focus_requested {
            entry.focus_pending = false;
            entry.last_focus_at = Some(now_ms);
        }

        Advisories {
            close_requested: entry.close_requested,
            focus_requested,
        }
    }

    /// The executor confirmed it let go of the slot.
    pub fn mark_relinquished(&self, token: &Token, now_ms: u128) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(token.clone())
            .or_insert_with(|| ControlEntry::new(now_ms));
        entry.relinquished.send_replace(true);
        entry.touched_at = now_ms;
    }

    /// Wait up to `wait` for [`ControlBoard::mark_relinquished`].
    pub async fn wait_relinquished(&self, token: &Token, wait: Duration, now_ms: u128) -> bool {
        let mut rx = {
            let mut entries = self.entries.lock();
            entries
                .entry(token.clone())
                .or_insert_with(|| ControlEntry::new(now_ms))
                .relinquished
                .subscribe()
        };
        let confirmed = matches!(
            tokio::time::timeout(wait, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        confirmed
    }

    /// Drop all state for a token.
    pub fn forget(&self, token: &Token) {
        self.entries.lock().remove(token);
    }

    /// Remove entries untouched for `idle_ttl`. Returns how many were dropped.
    pub fn prune(&self, now_ms: u128, idle_ttl: Duration) -> usize {
        let ttl = idle_ttl.as_millis();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now_ms.saturating_sub(e.touched_at) < ttl);
        before - entries.len()
    }

    /// Tracked tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
