//! Control envelopes and outgoing message shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Wire `type` of a control request.
pub const CONTROL_REQUEST: &str = "control_request";
/// Wire `type` of a control response.
pub const CONTROL_RESPONSE: &str = "control_response";

/// Control-request subtype that interrupts the current turn.
pub const SUBTYPE_INTERRUPT: &str = "interrupt";
/// Control-response subtype reporting a failure.
pub const SUBTYPE_ERROR: &str = "error";

/// Session id used in outgoing messages before the CLI reports one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// The `response` part of a `control_response` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub request_id: String,
    pub subtype: String,
    /// Payload of a successful response.
    #[serde(default)]
    pub response: Option<Value>,
    /// Error text of an `error` response.
    #[serde(default)]
    pub error: Option<String>,
}

impl ControlResponse {
    /// Extract a control response from a stdout frame.
    ///
    /// Returns `None` unless the frame is a `control_response` whose
    /// `response` carries a string `request_id`.
    pub fn from_frame(frame: &Value) -> Option<Self> {
        if frame.get("type").and_then(Value::as_str) != Some(CONTROL_RESPONSE) {
            return None;
        }
        let response = frame.get("response")?;
        response.get("request_id").and_then(Value::as_str)?;
        serde_json::from_value(response.clone()).ok()
    }

    pub fn is_error(&self) -> bool {
        self.subtype == SUBTYPE_ERROR
    }
}

/// Wrap a request payload in a `control_request` envelope.
pub fn control_request(request_id: &str, request: Value) -> Value {
    json!({
        "type": CONTROL_REQUEST,
        "request_id": request_id,
        "request": request,
    })
}

/// Payload of an interrupt control request.
pub fn interrupt_request() -> Value {
    json!({ "subtype": SUBTYPE_INTERRUPT })
}

/// The minimal user-message envelope accepted on stdin.
pub fn user_message(content: impl Into<Value>, session_id: &str) -> Value {
    json!({
        "type": "user",
        "message": { "role": "user", "content": content.into() },
        "parent_tool_use_id": null,
        "session_id": session_id,
    })
}

/// Bring an outgoing message to the minimal envelope.
///
/// Strings become user messages. Objects that already carry a `type` keep
/// their fields; a missing `session_id` (and, for user messages, a missing
/// `parent_tool_use_id`) is filled in. Any other value becomes the content of
/// a user message.
pub fn normalize_outgoing(message: Value, session_id: &str) -> Value {
    match message {
        Value::String(text) => user_message(text, session_id),
        Value::Object(mut map) if map.get("type").is_some_and(Value::is_string) => {
            let is_user = map.get("type").and_then(Value::as_str) == Some("user");
            map.entry("session_id").or_insert_with(|| json!(session_id));
            if is_user {
                map.entry("parent_tool_use_id").or_insert(Value::Null);
            }
            Value::Object(map)
        }
        other => user_message(other, session_id),
    }
}
