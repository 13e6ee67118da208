//! Agent hub.
//!
//! Keeps one live connection per agent name, routes inbound frames by type
//! and layers synchronous request/response calls over the asynchronous
//! WebSocket transport.

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod transport;

pub use config::HubConfig;
pub use connection::{AgentInfo, Connection};
pub use error::HubError;
pub use handler::{InboundHandler, LoggingHandler};
pub use hub::{Hub, EVENT_AGENT_CONNECTED, EVENT_AGENT_DISCONNECTED};
