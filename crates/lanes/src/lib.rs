//! Lane scheduler.
//!
//! Work is grouped into named lanes. Each lane is a FIFO queue with its own
//! concurrency limit, drained by a single pump task; every dequeued task runs
//! on its own Tokio task behind panic containment and an optional watchdog.

pub mod config;
pub mod error;
pub mod events;
mod lane;
pub mod manager;
mod metrics;
pub mod task;

pub use config::{clamp_concurrency, lanes, LaneSpec, LaneTable};
pub use error::LaneError;
pub use events::LaneEvent;
pub use manager::{LaneManager, LaneStats};
pub use task::{SubmitOptions, TaskSnapshot, TaskStatus};
