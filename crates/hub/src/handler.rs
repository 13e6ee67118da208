use async_trait::async_trait;
use clawd_protocol::{AgentEvent, ApprovalRequest, AskRequest, Frame};
use tracing::{debug, warn};

/// Receives inbound frames the hub does not handle itself.
///
/// `agent` is the logical name of the connection the frame arrived on.
/// Every method defaults to logging and dropping the frame.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// A `res` matching no pending call, or any `stream` frame.
    async fn on_response(&self, agent: &str, frame: Frame) {
        debug!(agent = %agent, id = ?frame.id, "Unclaimed {} frame dropped", frame.kind);
    }

    async fn on_event(&self, agent: &str, event: AgentEvent) {
        debug!(agent = %agent, event = %event.event, "Agent event");
    }

    /// Runs on its own task; the decision is sent back with
    /// `Hub::send_approval_response`.
    async fn on_approval_request(&self, agent: &str, request: ApprovalRequest) {
        warn!(
            agent = %agent,
            tool = %request.tool,
            "No approval handler; request {} left unanswered",
            request.id
        );
    }

    /// Runs on its own task; the answer is sent back with
    /// `Hub::send_ask_response`.
    async fn on_ask_request(&self, agent: &str, request: AskRequest) {
        warn!(agent = %agent, "No ask handler; question {} left unanswered", request.id);
    }
}

/// Handler that keeps every default.
pub struct LoggingHandler;

#[async_trait]
impl InboundHandler for LoggingHandler {}
