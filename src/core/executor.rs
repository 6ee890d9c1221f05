//! Dispatch boundary: how the scheduler hands a slot to an external executor.
//!
//! The scheduler never looks inside an executor. It asks an
//! [`ExecutorSpawner`] to start one for a token and keeps the returned
//! [`ExecutorHandle`] as an opaque receipt. Everything the executor does
//! afterwards arrives through the reporting contract on
//! [`SlotService`](super::SlotService).

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::SlotError;
use super::slot::{OwnerId, Token};

/// Spawns detached background futures.
///
/// Implemented by the runtime adapters so core code stays runtime-agnostic.
pub trait Spawn {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// What the executor needs to start working on a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Slot token.
    pub token: Token,
    /// Slot owner.
    pub owner: OwnerId,
    /// Display title.
    pub title: String,
    /// Task input.
    pub payload: String,
}

/// Opaque receipt for a started executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorHandle {
    /// Token the executor was started for.
    pub token: Token,
    /// Spawner-defined identifier.
    pub id: String,
}

/// Starts, salvages and stops external executors.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_slot_scheduler::core::{DispatchRequest, ExecutorHandle, ExecutorSpawner, SlotError};
///
/// struct PrintSpawner;
///
/// #[async_trait]
/// impl ExecutorSpawner for PrintSpawner {
///     async fn spawn(&self, req: &DispatchRequest) -> Result<ExecutorHandle, SlotError> {
///         println!("start {} for {}", req.token, req.owner);
///         Ok(ExecutorHandle { token: req.token.clone(), id: "stdout".into() })
///     }
/// }
/// ```
#[async_trait]
pub trait ExecutorSpawner: Send + Sync + 'static {
    /// Start an executor for the slot.
    async fn spawn(&self, request: &DispatchRequest) -> Result<ExecutorHandle, SlotError>;

    /// Ask a live executor to recover the output it already produced.
    ///
    /// `Ok(true)` acknowledges the request; the executor is then expected to
    /// report `done` within the salvage grace window.
    async fn request_salvage(&self, _handle: &ExecutorHandle) -> Result<bool, SlotError> {
        Ok(false)
    }

    /// Tear the executor down. Returns whether anything was stopped.
    async fn abort(&self, _handle: &ExecutorHandle) -> bool {
        false
    }
}
