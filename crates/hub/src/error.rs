use clawd_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Hub errors.
#[derive(Error, Debug)]
pub enum HubError {
    /// Outbound buffer full. The send was dropped; the connection stays open.
    #[error("Send buffer full for agent '{0}'")]
    Backpressure(String),

    #[error("Agent not connected: {0}")]
    NotFound(String),

    #[error("Call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Call cancelled")]
    Cancelled,

    /// The connection went away while a send or call was in flight.
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HubError {
    /// Timeout or cancellation, as opposed to an application failure.
    pub fn is_deadline(&self) -> bool {
        matches!(self, HubError::Timeout { .. } | HubError::Cancelled)
    }
}
