//! Change notifications fanned out to every coordinator and observer.
//!
//! [`Notifier`] wraps a [`tokio::sync::broadcast`] channel. Publishing never
//! blocks; slow receivers see `RecvError::Lagged` and should treat it as
//! "something changed" and re-read the store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use super::executor::Spawn;
use super::slot::{OwnerId, SlotStatus, Token};
use crate::util::clock::Clock;

/// Event pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A slot was created, transitioned, pinned or deleted.
    SlotChanged {
        /// Owner of the slot.
        owner: OwnerId,
        /// Slot token.
        token: Token,
        /// Status after the change; `None` when deleted.
        status: Option<SlotStatus>,
        /// Whether the slot is gone.
        deleted: bool,
    },
    /// The process-wide concurrency limit changed.
    ConfigChanged {
        /// New limit.
        concurrency_limit: u32,
    },
    /// Periodic keep-alive so observers can detect a dead channel.
    Ping {
        /// Emission time.
        now_ms: u128,
    },
}

impl Notification {
    /// Whether the event should wake a scheduler.
    pub const fn triggers_tick(&self) -> bool {
        !matches!(self, Self::Ping { .. })
    }
}

/// Broadcast bus for [`Notification`]s.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Bus with a shared ring buffer of `capacity` events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    /// New independent receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Live receivers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Announce a slot mutation.
    pub fn slot_changed(&self, owner: &OwnerId, token: &Token, status: Option<SlotStatus>) {
        self.publish(Notification::SlotChanged {
            owner: owner.clone(),
            token: token.clone(),
            status,
            deleted: status.is_none(),
        });
    }

    /// Emit [`Notification::Ping`] every `every` until `shutdown` flips to `true`.
    pub fn spawn_pinger<S: Spawn>(
        &self,
        spawner: &S,
        every: Duration,
        clock: Arc<dyn Clock>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let notifier = self.clone();
        spawner.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        notifier.publish(Notification::Ping { now_ms: clock.now_ms() });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("notifier pinger stopped");
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
