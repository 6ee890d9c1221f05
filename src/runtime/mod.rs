//! Runtime adapters, the per-owner coordinator and the API surface.

pub mod api;
pub mod coordinator;
pub mod tokio_spawner;

pub use api::{Health, HeartbeatRequest, ListResponse, ReportRequest, SubmitRequest};
pub use coordinator::{Coordinator, CoordinatorReport, CoordinatorSettings};
pub use tokio_spawner::TokioSpawner;
