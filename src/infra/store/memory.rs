//! Lock-guarded slot table with pluggable persistence.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{
    Admission, ClearScope, CompletionPolicy, NewSlot, Notifier, OwnerId, Requeued, Slot,
    SlotError, SlotStatus, SlotStore, SlotTable, SlotUpdate, Token, TransitionOutcome,
};
use crate::util::clock::Clock;

/// Where a table snapshot goes after each mutation.
pub trait Persistence: Send + Sync + 'static {
    /// Persist the whole table.
    fn save(&self, table: &SlotTable) -> Result<(), SlotError>;

    /// Whether `save` can fail. Durable backends get the change staged on a
    /// copy and committed only once it is saved.
    fn is_durable(&self) -> bool {
        true
    }
}

/// Keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn save(&self, _table: &SlotTable) -> Result<(), SlotError> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// [`SlotStore`] over a mutex-guarded [`SlotTable`].
///
/// Every mutation holds the lock for the table change and the save, then
/// publishes on the notifier after releasing it. A change the backend
/// refused to save never becomes visible.
pub struct SlotTableStore<P: Persistence> {
    table: Mutex<SlotTable>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    persistence: P,
}

/// Volatile store.
pub type InMemorySlotStore = SlotTableStore<NoPersistence>;

impl InMemorySlotStore {
    /// Empty in-memory store.
    pub fn new(notifier: Notifier, clock: Arc<dyn Clock>) -> Self {
        Self::with_table(SlotTable::new(), notifier, clock, NoPersistence)
    }
}

impl<P: Persistence> SlotTableStore<P> {
    /// Store seeded with `table`.
    pub fn with_table(table: SlotTable, notifier: Notifier, clock: Arc<dyn Clock>, persistence: P) -> Self {
        Self {
            table: Mutex::new(table),
            notifier,
            clock,
            persistence,
        }
    }

    /// Change how repeated completions are treated.
    #[must_use]
    pub fn with_completion_policy(self, policy: CompletionPolicy) -> Self {
        self.table.lock().set_completion_policy(policy);
        self
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut SlotTable, u128) -> Result<T, SlotError>,
    ) -> Result<T, SlotError> {
        let now = self.clock.now_ms();
        let mut table = self.table.lock();
        if !self.persistence.is_durable() {
            return op(&mut table, now);
        }
        let mut draft = table.clone();
        let out = op(&mut draft, now)?;
        self.persistence.save(&draft)?;
        *table = draft;
        Ok(out)
    }

    fn announce(&self, slot: &Slot) {
        self.notifier
            .slot_changed(&slot.owner, &slot.token, Some(slot.status));
    }

    fn announce_deleted(&self, slot: &Slot) {
        self.notifier.slot_changed(&slot.owner, &slot.token, None);
    }
}

impl<P: Persistence> SlotStore for SlotTableStore<P> {
    fn create(&self, new: NewSlot) -> Result<Slot, SlotError> {
        let slot = self.mutate(|table, now| table.create(new, now))?;
        self.announce(&slot);
        Ok(slot)
    }

    fn transition(
        &self,
        token: &Token,
        to: SlotStatus,
        update: SlotUpdate,
    ) -> Result<TransitionOutcome, SlotError> {
        let outcome = self.mutate(|table, now| table.transition(token, to, update, now))?;
        if let TransitionOutcome::Applied(slot) = &outcome {
            self.announce(slot);
        }
        Ok(outcome)
    }

    fn claim(&self, token: &Token) -> Result<Slot, SlotError> {
        let slot = self.mutate(|table, now| table.claim(token, now))?;
        self.announce(&slot);
        Ok(slot)
    }

    fn admit(&self, token: &Token, owner_limit: u32) -> Result<Admission, SlotError> {
        let admission = self.mutate(|table, now| table.admit(token, owner_limit, now))?;
        if let Admission::Admitted(slot) = &admission {
            self.announce(slot);
        }
        Ok(admission)
    }

    fn revert_admission(&self, token: &Token) -> Result<bool, SlotError> {
        let (reverted, slot) = self.mutate(|table, now| {
            let reverted = table.revert_admission(token, now)?;
            Ok((reverted, table.get(token)?.clone()))
        })?;
        if reverted {
            self.announce(&slot);
        }
        Ok(reverted)
    }

    fn touch_heartbeat(&self, token: &Token, rtt_ms: Option<u64>) -> Result<Slot, SlotError> {
        self.mutate(|table, now| table.touch_heartbeat(token, rtt_ms, now))
    }

    fn get(&self, token: &Token) -> Result<Slot, SlotError> {
        self.table.lock().get(token).cloned()
    }

    fn list(&self, owner: &OwnerId) -> Result<Vec<Slot>, SlotError> {
        Ok(self.table.lock().list(owner))
    }

    fn snapshot(&self) -> Result<Vec<Slot>, SlotError> {
        Ok(self.table.lock().snapshot())
    }

    fn set_pinned(&self, token: &Token, owner: &OwnerId, pinned: bool) -> Result<Slot, SlotError> {
        let slot = self.mutate(|table, now| table.set_pinned(token, owner, pinned, now))?;
        self.announce(&slot);
        Ok(slot)
    }

    fn requeue(
        &self,
        old: &Token,
        new_token: Token,
        marker: &str,
    ) -> Result<Option<Slot>, SlotError> {
        let Some(Requeued { retired, fresh }) =
            self.mutate(|table, now| table.requeue(old, new_token, marker, now))?
        else {
            return Ok(None);
        };
        self.announce_deleted(&retired);
        self.announce(&fresh);
        Ok(Some(fresh))
    }

    fn delete(&self, token: &Token, owner: &OwnerId) -> Result<Slot, SlotError> {
        let slot = self.mutate(|table, _| table.delete(token, owner))?;
        self.announce_deleted(&slot);
        Ok(slot)
    }

    fn clear(
        &self,
        owner: &OwnerId,
        scope: ClearScope,
        keep: &HashSet<Token>,
    ) -> Result<Vec<Slot>, SlotError> {
        let removed = self.mutate(|table, _| Ok(table.clear(owner, scope, keep)))?;
        for slot in &removed {
            self.announce_deleted(slot);
        }
        Ok(removed)
    }
}
