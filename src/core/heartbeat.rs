//! Heartbeat classification, worker-session tracking and the two watchdogs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::slot::{OwnerId, Slot, Token};
use crate::util::clock::Clock;

/// Heartbeat age below which an executor is considered healthy.
pub const HEALTHY_BELOW_MS: u128 = 6_000;
/// Heartbeat age below which an executor is only lagging.
pub const WARNING_BELOW_MS: u128 = 15_000;

/// Display band for a heartbeat age. No action is taken on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatBand {
    /// Age under 6s.
    Healthy,
    /// Age under 15s.
    Warning,
    /// Anything older.
    Stale,
    /// No heartbeat yet, or the slot is terminal.
    Unknown,
}

impl HeartbeatBand {
    /// Band for an optional heartbeat age.
    pub const fn classify(age_ms: Option<u128>) -> Self {
        match age_ms {
            None => Self::Unknown,
            Some(age) if age < HEALTHY_BELOW_MS => Self::Healthy,
            Some(age) if age < WARNING_BELOW_MS => Self::Warning,
            Some(_) => Self::Stale,
        }
    }
}

/// Session identity attached to a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSession {
    /// Executor instance id.
    pub session_id: String,
    /// Per-session sequence number, strictly increasing.
    pub seq: u64,
}

/// What to do with a heartbeat given its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVerdict {
    /// Known session, fresh sequence number (or no session supplied).
    Accepted,
    /// First session seen for the token; now the session of record.
    Adopted,
    /// Sequence number not strictly increasing.
    Duplicate,
    /// Another session already owns the token.
    Superseded,
}

impl SessionVerdict {
    /// Whether the heartbeat should be recorded.
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted | Self::Adopted)
    }
}

#[derive(Debug)]
struct SessionRecord {
    session_id: String,
    last_seq: u64,
}

/// Session of record per token.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Token, SessionRecord>>,
    rebinding: Mutex<HashSet<Token>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a heartbeat's session and sequence number, recording it if accepted.
    pub fn check(&self, token: &Token, session: Option<&WorkerSession>) -> SessionVerdict {
        let Some(session) = session else {
            return SessionVerdict::Accepted;
        };
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(token) {
            None => {
                sessions.insert(
                    token.clone(),
                    SessionRecord {
                        session_id: session.session_id.clone(),
                        last_seq: session.seq,
                    },
                );
                SessionVerdict::Adopted
            }
            Some(record) if record.session_id == session.session_id => {
                if session.seq > record.last_seq {
                    record.last_seq = session.seq;
                    SessionVerdict::Accepted
                } else {
                    SessionVerdict::Duplicate
                }
            }
            Some(record) => {
                if self.rebinding.lock().remove(token) {
                    record.session_id.clone_from(&session.session_id);
                    record.last_seq = session.seq;
                    SessionVerdict::Adopted
                } else {
                    SessionVerdict::Superseded
                }
            }
        }
    }

    /// Let the next unknown session take over the token.
    pub fn rebind(&self, token: &Token) {
        self.rebinding.lock().insert(token.clone());
    }

    /// Current session of record.
    pub fn session_of(&self, token: &Token) -> Option<String> {
        self.sessions
            .lock()
            .get(token)
            .map(|r| r.session_id.clone())
    }

    /// Drop all state for a token.
    pub fn forget(&self, token: &Token) {
        self.sessions.lock().remove(token);
        self.rebinding.lock().remove(token);
    }
}

/// Watchdog thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Open duration and heartbeat age that together mean the executor is gone.
    pub liveness_timeout: Duration,
    /// Open duration after which salvage is requested.
    pub generation_timeout: Duration,
    /// How long a salvage may take before it counts as failed.
    pub salvage_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(90),
            generation_timeout: Duration::from_secs(25 * 60),
            salvage_grace: Duration::from_secs(45),
        }
    }
}

/// Raised by [`HeartbeatMonitor::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// No heartbeat and no progress for the liveness window.
    LivenessTimeout {
        /// Slot token.
        token: Token,
        /// Slot owner.
        owner: OwnerId,
        /// Time since `opened_at`.
        open_ms: u128,
        /// Time since the last heartbeat (or `opened_at`).
        age_ms: u128,
    },
    /// Open for longer than the generation timeout.
    GenerationTimeout {
        /// Slot token.
        token: Token,
        /// Slot owner.
        owner: OwnerId,
        /// Time since `opened_at`.
        open_ms: u128,
    },
    /// A salvage was started but the slot is still not terminal.
    SalvageExpired {
        /// Slot token.
        token: Token,
        /// Slot owner.
        owner: OwnerId,
    },
}

impl WatchdogEvent {
    /// Token the event refers to.
    pub const fn token(&self) -> &Token {
        match self {
            Self::LivenessTimeout { token, .. }
            | Self::GenerationTimeout { token, .. }
            | Self::SalvageExpired { token, .. } => token,
        }
    }
}

#[derive(Debug, Default)]
struct Watch {
    liveness_fired: bool,
    generation_fired: bool,
    salvage_deadline: Option<u128>,
    salvage_expired: bool,
}

/// Per-token watchdog bookkeeping.
///
/// Every event is one-shot per token. Terminal or vanished slots lose their
/// entry on the next sweep.
pub struct HeartbeatMonitor {
    config: WatchdogConfig,
    clock: Arc<dyn Clock>,
    watches: Mutex<HashMap<Token, Watch>>,
}

impl HeartbeatMonitor {
    /// Monitor with the given thresholds.
    pub fn new(config: WatchdogConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Configured thresholds.
    pub const fn config(&self) -> WatchdogConfig {
        self.config
    }

    /// Check every slot against both watchdogs.
    pub fn sweep(&self, slots: &[Slot]) -> Vec<WatchdogEvent> {
        let now = self.clock.now_ms();
        let liveness = self.config.liveness_timeout.as_millis();
        let generation = self.config.generation_timeout.as_millis();
        let mut watches = self.watches.lock();
        let mut events = Vec::new();

        let live: HashSet<&Token> = slots
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| &s.token)
            .collect();
        watches.retain(|token, _| live.contains(token));

        for slot in slots.iter().filter(|s| s.status.is_active()) {
            let Some(opened) = slot.opened_at else {
                continue;
            };
            let open_ms = now.saturating_sub(opened);
            let age_ms = now.saturating_sub(slot.heartbeat_last_at.unwrap_or(opened));
            let watch = watches.entry(slot.token.clone()).or_default();

            if !watch.liveness_fired && open_ms >= liveness && age_ms >= liveness {
                watch.liveness_fired = true;
                tracing::warn!(
                    "liveness timeout for {} (open {}ms, heartbeat age {}ms)",
                    slot.token,
                    open_ms,
                    age_ms
                );
                events.push(WatchdogEvent::LivenessTimeout {
                    token: slot.token.clone(),
                    owner: slot.owner.clone(),
                    open_ms,
                    age_ms,
                });
                continue;
            }

            if let Some(deadline) = watch.salvage_deadline {
                if !watch.salvage_expired && now >= deadline {
                    watch.salvage_expired = true;
                    tracing::warn!("salvage window expired for {}", slot.token);
                    events.push(WatchdogEvent::SalvageExpired {
                        token: slot.token.clone(),
                        owner: slot.owner.clone(),
                    });
                }
            } else if !watch.generation_fired && open_ms >= generation {
                watch.generation_fired = true;
                tracing::info!("generation timeout for {} after {}ms", slot.token, open_ms);
                events.push(WatchdogEvent::GenerationTimeout {
                    token: slot.token.clone(),
                    owner: slot.owner.clone(),
                    open_ms,
                });
            }
        }
        events
    }

    /// An executor acknowledged a salvage request; start the grace window.
    pub fn salvage_started(&self, token: &Token) {
        let deadline = self.clock.now_ms() + self.config.salvage_grace.as_millis();
        let mut watches = self.watches.lock();
        let watch = watches.entry(token.clone()).or_default();
        watch.generation_fired = true;
        watch.salvage_deadline = Some(deadline);
    }

    /// Salvage deadline, if one is running.
    pub fn salvage_deadline(&self, token: &Token) -> Option<u128> {
        self.watches
            .lock()
            .get(token)
            .and_then(|w| w.salvage_deadline)
    }

    /// Drop bookkeeping for a token.
    pub fn forget(&self, token: &Token) {
        self.watches.lock().remove(token);
    }

    /// Number of tokens with watchdog state.
    pub fn tracked(&self) -> usize {
        self.watches.lock().len()
    }
}
