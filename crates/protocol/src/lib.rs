//! Clawd wire protocol.
//!
//! Every message exchanged between the daemon and an agent is one JSON
//! [`Frame`]. The envelope is shared by all frame kinds; kind-specific
//! payloads are decoded into their concrete shape only where they are used.

pub mod frame;
pub mod payload;

pub use frame::{decode, encode, new_correlation_id, Frame, FrameType, ProtocolError};
pub use payload::{
    AgentEvent, ApprovalRequest, ApprovalResponse, AskRequest, AskResponse, EVENT_READY,
};
