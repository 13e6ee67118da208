//! Frame envelope and JSON codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Frame of type {0} carries no id")]
    MissingId(FrameType),

    #[error("Expected {expected} frame, got {actual}")]
    UnexpectedType { expected: FrameType, actual: FrameType },

    #[error("Remote error: {0}")]
    Remote(String),
}

/// Kind of a frame, serialized as the `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Req,
    Res,
    Stream,
    Event,
    ApprovalRequest,
    ApprovalResponse,
    AskRequest,
    AskResponse,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Req => "req",
            FrameType::Res => "res",
            FrameType::Stream => "stream",
            FrameType::Event => "event",
            FrameType::ApprovalRequest => "approval_request",
            FrameType::ApprovalResponse => "approval_response",
            FrameType::AskRequest => "ask_request",
            FrameType::AskResponse => "ask_response",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message.
///
/// Only `type` is required on the wire. Unknown fields are ignored and
/// absent optional fields decode as `None`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    fn bare(kind: FrameType) -> Self {
        Self {
            kind,
            id: None,
            method: None,
            params: None,
            ok: None,
            payload: None,
            error: None,
        }
    }

    /// Build a `req` frame.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
            ..Self::bare(FrameType::Req)
        }
    }

    /// Build a successful `res` frame.
    pub fn response_ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            ok: Some(true),
            payload: Some(payload),
            ..Self::bare(FrameType::Res)
        }
    }

    /// Build a failed `res` frame.
    pub fn response_err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ok: Some(false),
            error: Some(error.into()),
            ..Self::bare(FrameType::Res)
        }
    }

    /// Build an `event` frame. The event name travels inside the payload.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        let payload = serde_json::json!({ "event": event.into(), "data": data });
        Self {
            payload: Some(payload),
            ..Self::bare(FrameType::Event)
        }
    }

    /// Build a frame of any kind carrying `payload`, correlated by `id`.
    pub fn with_payload(kind: FrameType, id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            payload: Some(payload),
            ..Self::bare(kind)
        }
    }

    /// Correlation id, or an error naming the frame kind.
    pub fn require_id(&self) -> Result<&str, ProtocolError> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingId(self.kind))
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(false)
    }

    /// Decode `params` into a concrete type. Absent params decode from `null`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        decode_value(self.params.clone())
    }

    /// Decode `payload` into a concrete type. Absent payload decodes from `null`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        decode_value(self.payload.clone())
    }

    /// Turn a `res` frame into the remote call's outcome.
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        if self.kind != FrameType::Res {
            return Err(ProtocolError::UnexpectedType {
                expected: FrameType::Res,
                actual: self.kind,
            });
        }
        if self.is_ok() {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(ProtocolError::Remote(
                self.error.unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }
}

fn decode_value<T: DeserializeOwned>(value: Option<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(value.unwrap_or(Value::Null))
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Parse one inbound message.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serialize one outbound message.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Fresh correlation id for a request frame.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_minimal_frame() {
        let frame = decode(r#"{"type":"event"}"#).unwrap();
        assert_eq!(frame.kind, FrameType::Event);
        assert!(frame.id.is_none());
        assert!(frame.payload.is_none());
        assert!(!frame.is_ok());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let frame = decode(r#"{"type":"res","id":"1","ok":true,"seq":7,"extra":{"a":1}}"#).unwrap();
        assert_eq!(frame.kind, FrameType::Res);
        assert_eq!(frame.id.as_deref(), Some("1"));
        assert!(frame.is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = decode(r#"{"type":"bogus"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"id":"missing type"}"#).is_err());
    }

    #[test]
    fn test_type_wire_names() {
        let frame = Frame::with_payload(FrameType::ApprovalResponse, "a1", json!({"approved": true}));
        let value: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "approval_response");
        assert_eq!(value["id"], "a1");
        assert!(value.get("method").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_request_shape() {
        let frame = Frame::request("c1", "chat.send", json!({"text": "hi"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "req");
        assert_eq!(value["method"], "chat.send");
        assert_eq!(value["params"]["text"], "hi");
        assert!(value.get("ok").is_none());
    }

    #[test]
    fn test_into_result_ok() {
        let frame = Frame::response_ok("1", json!({"answer": 42}));
        assert_eq!(frame.into_result().unwrap(), json!({"answer": 42}));
    }

    #[test]
    fn test_into_result_remote_error() {
        let frame = Frame::response_err("1", "tool crashed");
        match frame.into_result() {
            Err(ProtocolError::Remote(msg)) => assert_eq!(msg, "tool crashed"),
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_into_result_wrong_kind() {
        let frame = Frame::event("ready", json!({}));
        assert!(matches!(
            frame.into_result(),
            Err(ProtocolError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn test_require_id() {
        let frame = decode(r#"{"type":"res","id":""}"#).unwrap();
        assert!(matches!(frame.require_id(), Err(ProtocolError::MissingId(FrameType::Res))));
        let frame = Frame::response_ok("abc", Value::Null);
        assert_eq!(frame.require_id().unwrap(), "abc");
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
    }
}
