//! In-process slot table holding the transition contract.
//!
//! Every store backend wraps a [`SlotTable`] behind its own lock; the table
//! itself is plain data plus the rules that decide which writes land:
//!
//! - `done` never regresses; late non-`done` reports are absorbed.
//! - `error` only moves to `done` (with output at least as complete) or
//!   another `error`.
//! - `tries` only grows through `retrying`.
//! - progress never decreases while the slot is alive and is forced to 100
//!   on `done`.
//! - heartbeat fields are written by [`SlotTable::touch_heartbeat`] only.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::SlotError;
use super::slot::{
    truncate_reason, IgnoreCause, NewSlot, OwnerId, Slot, SlotStatus, SlotUpdate, Token,
    TransitionOutcome, UNKNOWN_ERROR,
};
use super::store::{Admission, ClearScope};

/// How a second `done` for an already completed slot is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Replace the output only when the new one is strictly longer.
    #[default]
    LongerOutputWins,
    /// Keep the first recorded output.
    FirstWins,
}

impl CompletionPolicy {
    const fn accepts_repeat(self, previous_chars: usize, new_chars: usize) -> bool {
        match self {
            Self::LongerOutputWins => new_chars > previous_chars,
            Self::FirstWins => false,
        }
    }
}

/// Check a status change against the terminal-state rules.
pub fn validate_transition(from: SlotStatus, to: SlotStatus) -> Result<(), SlotError> {
    let allowed = match (from, to) {
        (SlotStatus::Done, target) => target == SlotStatus::Done,
        (SlotStatus::Error, target) => target.is_terminal(),
        (current, SlotStatus::Waiting) => current == SlotStatus::Waiting,
        _ => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(SlotError::InvalidTransition { from, to })
    }
}

/// Result of [`SlotTable::requeue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requeued {
    /// The replaced slot, already removed.
    pub retired: Slot,
    /// Its `waiting` successor.
    pub fresh: Slot,
}

/// Slot registry keyed by token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotTable {
    slots: HashMap<Token, Slot>,
    next_seq: u64,
    #[serde(skip)]
    completion: CompletionPolicy,
}

impl SlotTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the repeated-completion policy.
    #[must_use]
    pub const fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion = policy;
        self
    }

    /// Set the repeated-completion policy in place.
    pub fn set_completion_policy(&mut self, policy: CompletionPolicy) {
        self.completion = policy;
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert a `waiting` slot.
    ///
    /// Re-submitting the same token with the same payload returns the
    /// existing slot untouched.
    pub fn create(&mut self, new: NewSlot, now_ms: u128) -> Result<Slot, SlotError> {
        if let Some(existing) = self.slots.get(&new.token) {
            if existing.owner != new.owner {
                return Err(SlotError::Forbidden(new.token));
            }
            if existing.payload_in != new.payload {
                return Err(SlotError::DuplicateToken(new.token));
            }
            return Ok(existing.clone());
        }
        self.next_seq += 1;
        let slot = Slot::new(new, self.next_seq, now_ms);
        self.slots.insert(slot.token.clone(), slot.clone());
        Ok(slot)
    }

    /// Look up a slot.
    pub fn get(&self, token: &Token) -> Result<&Slot, SlotError> {
        self.slots
            .get(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))
    }

    /// Apply a status change, absorbing late or duplicate deliveries.
    pub fn transition(
        &mut self,
        token: &Token,
        to: SlotStatus,
        update: SlotUpdate,
        now_ms: u128,
    ) -> Result<TransitionOutcome, SlotError> {
        let completion = self.completion;
        let slot = self
            .slots
            .get_mut(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        let from = slot.status;

        if let Err(err) = validate_transition(from, to) {
            tracing::debug!("ignoring {} -> {} for {}", from, to, token);
            return Ok(TransitionOutcome::Ignored {
                status: from,
                cause: IgnoreCause::Regression(err),
            });
        }

        if to == SlotStatus::Done && from.is_terminal() {
            let previous = slot.payload_out.as_deref().map_or(0, |s| s.chars().count());
            let incoming = update.output.as_deref().map_or(0, |s| s.chars().count());
            let accept = if from == SlotStatus::Done {
                completion.accepts_repeat(previous, incoming)
            } else {
                update.output.is_some() && incoming >= previous
            };
            if !accept {
                return Ok(TransitionOutcome::Ignored {
                    status: from,
                    cause: IgnoreCause::IncompleteOutput,
                });
            }
        }

        slot.status = to;
        if to == SlotStatus::Retrying && update.increment_tries {
            slot.tries += 1;
        }

        if to == SlotStatus::Done {
            slot.progress = 100;
        } else if let Some(p) = update.progress {
            let clamped = u8::try_from(p.min(100)).unwrap_or(100);
            slot.progress = slot.progress.max(clamped);
        }

        match to {
            SlotStatus::Done => {
                if update.output.is_some() {
                    slot.payload_out = update.output;
                }
                slot.error_msg = None;
            }
            SlotStatus::Error => {
                let reason = update
                    .error_reason
                    .filter(|r| !r.trim().is_empty())
                    .map(|r| truncate_reason(&r))
                    .or_else(|| slot.error_msg.clone().filter(|r| !r.trim().is_empty()))
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                slot.error_msg = Some(reason);
            }
            SlotStatus::Retrying => {
                if let Some(reason) = update.error_reason.filter(|r| !r.trim().is_empty()) {
                    slot.error_msg = Some(truncate_reason(&reason));
                }
            }
            _ => {}
        }

        if to.is_active() && slot.opened_at.is_none() {
            slot.opened_at = Some(now_ms);
        }
        slot.updated_at = now_ms;
        Ok(TransitionOutcome::Applied(slot.clone()))
    }

    /// Executor claim: `waiting -> picked`, `opened_at` set once.
    pub fn claim(&mut self, token: &Token, now_ms: u128) -> Result<Slot, SlotError> {
        let slot = self
            .slots
            .get_mut(token)
            .filter(|s| !s.status.is_terminal())
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        if slot.status == SlotStatus::Waiting {
            slot.status = SlotStatus::Picked;
        }
        if slot.opened_at.is_none() {
            slot.opened_at = Some(now_ms);
        }
        slot.updated_at = now_ms;
        Ok(slot.clone())
    }

    /// Distinct `picked`/`running` slots of one owner.
    pub fn active_count(&self, owner: &OwnerId) -> usize {
        self.slots
            .values()
            .filter(|s| &s.owner == owner && s.status.is_active())
            .count()
    }

    /// Check-and-set `waiting -> picked` bounded by the owner's limit.
    pub fn admit(
        &mut self,
        token: &Token,
        owner_limit: u32,
        now_ms: u128,
    ) -> Result<Admission, SlotError> {
        let (owner, status) = {
            let slot = self.get(token)?;
            (slot.owner.clone(), slot.status)
        };
        if status != SlotStatus::Waiting {
            return Ok(Admission::NotWaiting(status));
        }
        let active = self.active_count(&owner);
        if active >= owner_limit as usize {
            return Ok(Admission::Full { active });
        }
        let slot = self
            .slots
            .get_mut(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        slot.status = SlotStatus::Picked;
        if slot.opened_at.is_none() {
            slot.opened_at = Some(now_ms);
        }
        slot.updated_at = now_ms;
        Ok(Admission::Admitted(slot.clone()))
    }

    /// Undo an admission whose executor never started.
    pub fn revert_admission(&mut self, token: &Token, now_ms: u128) -> Result<bool, SlotError> {
        let slot = self
            .slots
            .get_mut(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        if slot.status != SlotStatus::Picked || slot.heartbeat_count > 0 {
            return Ok(false);
        }
        slot.status = SlotStatus::Waiting;
        slot.opened_at = None;
        slot.updated_at = now_ms;
        Ok(true)
    }

    /// Retire `old` and insert a fresh `waiting` slot with the same input.
    ///
    /// The retired slot is marked `error: marker` and removed in the same
    /// step, so exactly one caller replaces a given token. Returns `None` when
    /// `old` is already gone or finished.
    pub fn requeue(
        &mut self,
        old: &Token,
        new_token: Token,
        marker: &str,
        now_ms: u128,
    ) -> Result<Option<Requeued>, SlotError> {
        if self.slots.contains_key(&new_token) {
            return Err(SlotError::DuplicateToken(new_token));
        }
        match self.slots.get(old) {
            None => return Ok(None),
            Some(slot) if slot.status == SlotStatus::Done => return Ok(None),
            Some(_) => {}
        }
        let Some(mut retired) = self.slots.remove(old) else {
            return Ok(None);
        };
        retired.status = SlotStatus::Error;
        retired.error_msg = Some(truncate_reason(marker));
        retired.updated_at = now_ms;

        self.next_seq += 1;
        let mut fresh = Slot::new(
            NewSlot {
                token: new_token,
                owner: retired.owner.clone(),
                title: retired.title.clone(),
                payload: retired.payload_in.clone(),
            },
            self.next_seq,
            now_ms,
        );
        fresh.pinned = retired.pinned;
        fresh.requeues = retired.requeues.saturating_add(1);
        self.slots.insert(fresh.token.clone(), fresh.clone());
        Ok(Some(Requeued { retired, fresh }))
    }

    /// Record a heartbeat. Never touches `status`.
    pub fn touch_heartbeat(
        &mut self,
        token: &Token,
        rtt_ms: Option<u64>,
        now_ms: u128,
    ) -> Result<Slot, SlotError> {
        let slot = self
            .slots
            .get_mut(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        slot.heartbeat_last_at = Some(now_ms);
        if rtt_ms.is_some() {
            slot.heartbeat_rtt = rtt_ms;
        }
        slot.heartbeat_count += 1;
        Ok(slot.clone())
    }

    /// Owner's slots, pinned first, then most recently updated.
    pub fn list(&self, owner: &OwnerId) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect();
        slots.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(b.seq.cmp(&a.seq))
        });
        slots
    }

    /// Every slot, in insertion order.
    pub fn snapshot(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.slots.values().cloned().collect();
        slots.sort_by_key(|s| s.seq);
        slots
    }

    /// Pin or unpin; pinning clears every other pin of the owner.
    pub fn set_pinned(
        &mut self,
        token: &Token,
        owner: &OwnerId,
        pinned: bool,
        now_ms: u128,
    ) -> Result<Slot, SlotError> {
        self.check_owner(token, owner)?;
        if pinned {
            for slot in self.slots.values_mut().filter(|s| &s.owner == owner) {
                slot.pinned = false;
            }
        }
        let slot = self
            .slots
            .get_mut(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))?;
        slot.pinned = pinned;
        slot.updated_at = now_ms;
        Ok(slot.clone())
    }

    /// Remove one slot.
    pub fn delete(&mut self, token: &Token, owner: &OwnerId) -> Result<Slot, SlotError> {
        self.check_owner(token, owner)?;
        self.slots
            .remove(token)
            .ok_or_else(|| SlotError::NotFound(token.clone()))
    }

    /// Bulk removal by scope, sparing `keep`.
    pub fn clear(
        &mut self,
        owner: &OwnerId,
        scope: ClearScope,
        keep: &HashSet<Token>,
    ) -> Vec<Slot> {
        let doomed: Vec<Token> = self
            .slots
            .values()
            .filter(|s| &s.owner == owner && scope.matches(s) && !keep.contains(&s.token))
            .map(|s| s.token.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|token| self.slots.remove(token))
            .collect()
    }

    fn check_owner(&self, token: &Token, owner: &OwnerId) -> Result<(), SlotError> {
        let slot = self.get(token)?;
        if &slot.owner == owner {
            Ok(())
        } else {
            Err(SlotError::Forbidden(token.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::from("alice")
    }

    fn new_slot(token: &str, payload: &str) -> NewSlot {
        NewSlot {
            token: Token::from(token),
            owner: owner(),
            title: format!("title-{token}"),
            payload: payload.into(),
        }
    }

    fn table_with(tokens: &[&str]) -> SlotTable {
        let mut table = SlotTable::new();
        for (i, t) in tokens.iter().enumerate() {
            table.create(new_slot(t, "payload"), 1_000 + i as u128).unwrap();
        }
        table
    }

    #[test]
    fn create_rejects_different_payload_for_same_token() {
        let mut table = table_with(&["a"]);
        let again = table.create(new_slot("a", "payload"), 2_000).unwrap();
        assert_eq!(again.seq, 1);

        let err = table.create(new_slot("a", "other"), 2_000).unwrap_err();
        assert_eq!(err, SlotError::DuplicateToken(Token::from("a")));
    }

    #[test]
    fn snapshot_follows_insertion_order() {
        let mut table = table_with(&["c", "a", "b"]);
        table
            .create(
                NewSlot {
                    owner: OwnerId::from("bob"),
                    ..new_slot("d", "payload")
                },
                5_000,
            )
            .unwrap();
        let order: Vec<String> = table
            .snapshot()
            .iter()
            .map(|s| s.token.as_str().to_string())
            .collect();
        assert_eq!(order, ["c", "a", "b", "d"]);
    }

    #[test]
    fn requeue_replaces_once_and_carries_lineage() {
        let mut table = table_with(&["a"]);
        let a = Token::from("a");
        table.set_pinned(&a, &owner(), true, 1_500).unwrap();
        table
            .transition(&a, SlotStatus::Error, SlotUpdate::error("glitch"), 2_000)
            .unwrap();

        let first = table
            .requeue(&a, Token::from("b"), "glitch→requeue-as-new", 3_000)
            .unwrap()
            .unwrap();
        assert_eq!(first.retired.status, SlotStatus::Error);
        assert_eq!(first.retired.error_msg.as_deref(), Some("glitch→requeue-as-new"));
        assert_eq!(first.fresh.status, SlotStatus::Waiting);
        assert_eq!(first.fresh.payload_in, "payload");
        assert_eq!(first.fresh.requeues, 1);
        assert!(first.fresh.pinned);
        assert!(table.get(&a).is_err());

        let again = table
            .requeue(&a, Token::from("c"), "glitch→requeue-as-new", 3_000)
            .unwrap();
        assert_eq!(again, None);
        assert_eq!(table.len(), 1);

        let second = table
            .requeue(&Token::from("b"), Token::from("d"), "x", 4_000)
            .unwrap()
            .unwrap();
        assert_eq!(second.fresh.requeues, 2);
    }

    #[test]
    fn requeue_leaves_done_slots_alone() {
        let mut table = table_with(&["a", "b"]);
        let a = Token::from("a");
        table
            .transition(&a, SlotStatus::Done, SlotUpdate::output("ok"), 2_000)
            .unwrap();
        assert_eq!(table.requeue(&a, Token::from("z"), "x", 3_000).unwrap(), None);
        assert_eq!(
            table.requeue(&a, Token::from("b"), "x", 3_000).unwrap_err(),
            SlotError::DuplicateToken(Token::from("b"))
        );
        assert_eq!(table.get(&a).unwrap().status, SlotStatus::Done);
    }

    #[test]
    fn done_never_regresses() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("result"), 2_000)
            .unwrap();

        for late in [SlotStatus::Running, SlotStatus::Retrying, SlotStatus::Error] {
            let outcome = table
                .transition(&t, late, SlotUpdate::error("late"), 3_000)
                .unwrap();
            assert!(!outcome.is_applied());
            assert_eq!(outcome.status(), SlotStatus::Done);
        }
        let slot = table.get(&t).unwrap();
        assert_eq!(slot.status, SlotStatus::Done);
        assert_eq!(slot.progress, 100);
        assert_eq!(slot.error_msg, None);
    }

    #[test]
    fn repeated_done_only_accepts_longer_output() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("abcd"), 2_000)
            .unwrap();

        let shorter = table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("ab"), 2_100)
            .unwrap();
        assert_eq!(
            shorter,
            TransitionOutcome::Ignored {
                status: SlotStatus::Done,
                cause: IgnoreCause::IncompleteOutput
            }
        );

        let longer = table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("abcdef"), 2_200)
            .unwrap();
        assert!(longer.is_applied());
        assert_eq!(table.get(&t).unwrap().payload_out.as_deref(), Some("abcdef"));
    }

    #[test]
    fn first_wins_policy_keeps_original_output() {
        let mut table = table_with(&["a"]).with_completion_policy(CompletionPolicy::FirstWins);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("ab"), 2_000)
            .unwrap();
        let outcome = table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("abcdef"), 2_100)
            .unwrap();
        assert!(!outcome.is_applied());
    }

    #[test]
    fn error_accepts_late_done_with_output() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Error, SlotUpdate::error("boom"), 2_000)
            .unwrap();
        let back = table
            .transition(&t, SlotStatus::Running, SlotUpdate::default(), 2_100)
            .unwrap();
        assert!(!back.is_applied());

        let done = table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("late result"), 2_200)
            .unwrap();
        assert!(done.is_applied());
        let slot = table.get(&t).unwrap();
        assert_eq!(slot.status, SlotStatus::Done);
        assert_eq!(slot.error_msg, None);
    }

    #[test]
    fn terminal_error_always_has_a_message() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Error, SlotUpdate::error("   "), 2_000)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().error_msg.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn tries_only_grow_through_retrying() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        let bump = SlotUpdate {
            increment_tries: true,
            ..SlotUpdate::default()
        };
        table
            .transition(&t, SlotStatus::Running, bump.clone(), 2_000)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().tries, 0);

        table
            .transition(&t, SlotStatus::Retrying, bump, 2_100)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().tries, 1);
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Running, SlotUpdate::progress(40), 2_000)
            .unwrap();
        table
            .transition(&t, SlotStatus::Running, SlotUpdate::progress(10), 2_100)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().progress, 40);
        table
            .transition(&t, SlotStatus::Running, SlotUpdate::progress(900), 2_200)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().progress, 100);
    }

    #[test]
    fn opened_at_is_set_once() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table.claim(&t, 5_000).unwrap();
        table
            .transition(&t, SlotStatus::Running, SlotUpdate::default(), 9_000)
            .unwrap();
        assert_eq!(table.get(&t).unwrap().opened_at, Some(5_000));
    }

    #[test]
    fn claim_fails_for_terminal_slots() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table
            .transition(&t, SlotStatus::Done, SlotUpdate::output("x"), 2_000)
            .unwrap();
        assert_eq!(table.claim(&t, 3_000).unwrap_err(), SlotError::NotFound(t));
    }

    #[test]
    fn heartbeat_never_changes_status() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        let slot = table.touch_heartbeat(&t, Some(42), 2_000).unwrap();
        assert_eq!(slot.status, SlotStatus::Waiting);
        assert_eq!(slot.heartbeat_count, 1);
        assert_eq!(slot.heartbeat_rtt, Some(42));
        assert_eq!(slot.heartbeat_last_at, Some(2_000));
    }

    #[test]
    fn admit_respects_owner_limit() {
        let mut table = table_with(&["a", "b", "c"]);
        assert!(matches!(
            table.admit(&Token::from("a"), 2, 2_000).unwrap(),
            Admission::Admitted(_)
        ));
        assert!(matches!(
            table.admit(&Token::from("b"), 2, 2_000).unwrap(),
            Admission::Admitted(_)
        ));
        assert_eq!(
            table.admit(&Token::from("c"), 2, 2_000).unwrap(),
            Admission::Full { active: 2 }
        );
        assert_eq!(
            table.admit(&Token::from("a"), 2, 2_000).unwrap(),
            Admission::NotWaiting(SlotStatus::Picked)
        );
    }

    #[test]
    fn revert_admission_returns_slot_to_waiting() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        table.admit(&t, 1, 2_000).unwrap();
        assert!(table.revert_admission(&t, 2_100).unwrap());
        let slot = table.get(&t).unwrap();
        assert_eq!(slot.status, SlotStatus::Waiting);
        assert_eq!(slot.opened_at, None);
        assert!(!table.revert_admission(&t, 2_200).unwrap());
    }

    #[test]
    fn list_orders_pinned_then_recent() {
        let mut table = table_with(&["a", "b", "c"]);
        table
            .set_pinned(&Token::from("a"), &owner(), true, 1_500)
            .unwrap();
        table
            .set_pinned(&Token::from("b"), &owner(), true, 1_600)
            .unwrap();

        let order: Vec<String> = table
            .list(&owner())
            .into_iter()
            .map(|s| s.token.to_string())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert!(!table.get(&Token::from("a")).unwrap().pinned);
    }

    #[test]
    fn delete_checks_owner() {
        let mut table = table_with(&["a"]);
        let t = Token::from("a");
        assert_eq!(
            table.delete(&t, &OwnerId::from("mallory")).unwrap_err(),
            SlotError::Forbidden(t.clone())
        );
        table.delete(&t, &owner()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn clear_scopes() {
        let mut table = table_with(&["w", "p", "d", "e"]);
        table.admit(&Token::from("p"), 8, 2_000).unwrap();
        table
            .transition(&Token::from("d"), SlotStatus::Done, SlotUpdate::output("x"), 2_000)
            .unwrap();
        table
            .transition(&Token::from("e"), SlotStatus::Error, SlotUpdate::error("x"), 2_000)
            .unwrap();

        let mut done = table.clone();
        let removed = done.clear(&owner(), ClearScope::Done, &HashSet::new());
        assert_eq!(removed.len(), 2);

        let mut all = table.clone();
        let keep: HashSet<Token> = [Token::from("w")].into_iter().collect();
        let removed = all.clear(&owner(), ClearScope::All, &keep);
        assert_eq!(removed.len(), 2);
        assert!(all.get(&Token::from("p")).is_ok());
        assert!(all.get(&Token::from("w")).is_ok());
    }
}
