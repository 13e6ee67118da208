//! Typed payloads carried inside the frame envelope.

use crate::frame::{Frame, FrameType, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name pushed to every agent right after it registers.
pub const EVENT_READY: &str = "ready";

/// Payload of an `event` frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AgentEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl AgentEvent {
    /// Decode an `event` frame.
    ///
    /// `{"event": name, "data": ..}` payloads decode as-is. Any other payload
    /// is kept whole as `data`, named after the frame's `method` (empty when
    /// absent).
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_kind(frame, FrameType::Event)?;
        if let Some(Value::Object(map)) = &frame.payload {
            if map.get("event").is_some_and(Value::is_string) {
                return frame.payload_as();
            }
        }
        Ok(Self {
            event: frame.method.clone().unwrap_or_default(),
            data: frame.payload.clone().unwrap_or(Value::Null),
        })
    }
}

/// An agent asks a human to approve a tool invocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApprovalRequest {
    #[serde(skip)]
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_kind(frame, FrameType::ApprovalRequest)?;
        let id = frame.require_id()?.to_string();
        let mut request: ApprovalRequest = frame.payload_as()?;
        request.id = id;
        Ok(request)
    }
}

/// Human decision on an [`ApprovalRequest`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn into_frame(self, request_id: &str) -> Result<Frame, ProtocolError> {
        Ok(Frame::with_payload(
            FrameType::ApprovalResponse,
            request_id,
            serde_json::to_value(self)?,
        ))
    }
}

/// An agent asks the user an interactive question.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AskRequest {
    #[serde(skip)]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl AskRequest {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_kind(frame, FrameType::AskRequest)?;
        let id = frame.require_id()?.to_string();
        let mut request: AskRequest = frame.payload_as()?;
        request.id = id;
        Ok(request)
    }
}

/// User answer to an [`AskRequest`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AskResponse {
    pub answer: String,
}

impl AskResponse {
    pub fn into_frame(self, request_id: &str) -> Result<Frame, ProtocolError> {
        Ok(Frame::with_payload(
            FrameType::AskResponse,
            request_id,
            serde_json::to_value(self)?,
        ))
    }
}

fn expect_kind(frame: &Frame, expected: FrameType) -> Result<(), ProtocolError> {
    if frame.kind != expected {
        return Err(ProtocolError::UnexpectedType {
            expected,
            actual: frame.kind,
        });
    }
    Ok(())
}
