//! Core slot model, transition contract, dispatch, liveness and recovery.

pub mod audit;
pub mod control;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod notifier;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod slot;
pub mod store;
pub mod table;

pub use audit::{build_audit_event, AuditEvent, AuditLog, AuditSink, InMemoryAuditSink, SharedAuditSink};
pub use control::{Advisories, ControlBoard, PokeAction};
pub use error::{AppResult, SlotError};
pub use executor::{DispatchRequest, ExecutorHandle, ExecutorSpawner, Spawn};
pub use heartbeat::{
    HeartbeatBand, HeartbeatMonitor, SessionRegistry, SessionVerdict, WatchdogConfig, WatchdogEvent,
    WorkerSession,
};
pub use notifier::{Notification, Notifier};
pub use recovery::{FailureReason, RecoveryController, RecoveryOutcome, RecoveryPolicy};
pub use scheduler::{DispatchOutcome, Scheduler, SkipReason, TickReport};
pub use service::{
    ClearReport, HeartbeatAck, HeartbeatReport, ReportAck, ReportBody, ServiceOptions, SlotService,
    Submission,
};
pub use slot::{
    IgnoreCause, NewSlot, OwnerId, Slot, SlotStatus, SlotUpdate, SlotView, Token, TransitionOutcome,
};
pub use store::{Admission, ClearScope, SlotStore};
pub use table::{validate_transition, CompletionPolicy, Requeued, SlotTable};
