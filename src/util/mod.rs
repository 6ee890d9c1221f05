//! Shared utilities.

pub mod clock;
pub mod ids;
pub mod telemetry;

pub use clock::{now_ms, Clock, ManualClock, SystemClock};
pub use ids::new_token;
pub use telemetry::init_tracing;
