//! Clawd daemon: composition root for the agent hub and the lane manager.

pub mod config;
pub mod crash_log;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{ConfigError, DaemonConfig};
pub use state::AppState;
