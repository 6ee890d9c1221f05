//! Audit trail for dispatch, watchdog, recovery and deletion actions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::slot::{OwnerId, Token};
use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Slot token.
    pub token: Token,
    /// Slot owner.
    pub owner: OwnerId,
    /// Action taken (dispatch, spawn_failed, liveness_timeout, salvage, requeue, fail, delete, clear).
    pub action: String,
    /// Additional context.
    pub detail: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Sink shared between the service, scheduler and recovery controller.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
pub fn shared_sink(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink with a bounded ring buffer.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Handle that can both record into and read back an [`InMemoryAuditSink`].
#[derive(Debug, Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<InMemoryAuditSink>>,
}

impl AuditLog {
    /// Bounded log.
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryAuditSink::new(max_events))),
        }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().events()
    }

    /// Events for one action.
    pub fn with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Sink view for the service and controllers.
    pub fn sink(&self) -> SharedAuditSink {
        shared_sink(self.clone())
    }
}

impl AuditSink for AuditLog {
    fn record(&mut self, event: AuditEvent) {
        self.inner.lock().record(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    token: &Token,
    owner: &OwnerId,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        token: token.clone(),
        owner: owner.clone(),
        action: action.into(),
        detail,
        created_at_ms: now_ms(),
    }
}

/// Record into a shared sink.
pub fn record(
    sink: &SharedAuditSink,
    token: &Token,
    owner: &OwnerId,
    action: &str,
    detail: Option<String>,
) {
    sink.lock()
        .record(build_audit_event(token, owner, action, detail));
}
