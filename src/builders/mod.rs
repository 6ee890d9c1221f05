//! Builders that assemble services and coordinators from configuration.

pub mod coordinator_builder;

pub use coordinator_builder::{build_coordinator, build_service, build_store};
