//! Decoded stdout messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tracing::debug;

use super::content::{ContentBlock, UserContent};

/// A message decoded from the CLI stdout.
///
/// Validated once at the decode boundary. Message kinds this crate does not
/// model, and known kinds whose shape does not match, are kept verbatim in
/// [`Message::Unknown`] so newer CLI versions do not break the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
    /// A request initiated by the CLI (for example a permission prompt).
    ControlRequest(InboundControlRequest),
    Unknown {
        message_type: String,
        raw: Value,
    },
}

/// System message, most notably the `init` message carrying the session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, rename = "permissionMode")]
    pub permission_mode: Option<String>,
    /// Every other field of the message.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

/// Assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl AssistantContent {
    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentBlock::text).collect()
    }
}

/// User message echoed by the CLI (prompts and tool results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message: UserMessageBody,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageBody {
    #[serde(default = "user_role")]
    pub role: String,
    pub content: UserContent,
}

fn user_role() -> String {
    "user".to_string()
}

/// End-of-turn summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResultMessage {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }
}

/// Raw API streaming event, emitted with `--include-partial-messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEventMessage {
    pub event: Value,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A control request sent by the CLI to this side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundControlRequest {
    pub request_id: String,
    pub request: Value,
}

impl Message {
    /// Decode a parsed JSON object into a typed message.
    ///
    /// Never fails: objects without a string `type`, unknown types, and known
    /// types that do not match their typed shape all become
    /// [`Message::Unknown`] with the raw object intact.
    pub fn from_value(value: Value) -> Self {
        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let decoded = match message_type.as_str() {
            "system" => typed(&value).map(Message::System),
            "assistant" => typed(&value).map(Message::Assistant),
            "user" => typed(&value).map(Message::User),
            "result" => typed(&value).map(Message::Result),
            "stream_event" => typed(&value).map(Message::StreamEvent),
            "control_request" => typed(&value).map(Message::ControlRequest),
            _ => None,
        };

        decoded.unwrap_or(Message::Unknown {
            message_type,
            raw: value,
        })
    }

    /// The `type` discriminator as it appeared on the wire.
    pub fn message_type(&self) -> &str {
        match self {
            Message::System(_) => "system",
            Message::Assistant(_) => "assistant",
            Message::User(_) => "user",
            Message::Result(_) => "result",
            Message::StreamEvent(_) => "stream_event",
            Message::ControlRequest(_) => "control_request",
            Message::Unknown { message_type, .. } => message_type,
        }
    }

    /// Session id carried by the message, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::System(m) => m.session_id.as_deref(),
            Message::Assistant(m) => m.session_id.as_deref(),
            Message::User(m) => m.session_id.as_deref(),
            Message::Result(m) => m.session_id.as_deref(),
            Message::StreamEvent(m) => m.session_id.as_deref(),
            Message::ControlRequest(_) => None,
            Message::Unknown { raw, .. } => raw.get("session_id").and_then(Value::as_str),
        }
    }

    /// Whether this message ends a turn.
    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Message::Result(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value)
        .inspect_err(|e| debug!(error = %e, "message shape not recognized, keeping raw"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_system_init() {
        let msg = Message::from_value(json!({
            "type": "system",
            "subtype": "init",
            "session_id": "sess-1",
            "cwd": "/repo",
            "tools": ["Read", "Bash"],
            "model": "claude-sonnet-4-5",
            "permissionMode": "default",
            "apiKeySource": "none"
        }));

        let Message::System(system) = &msg else {
            panic!("expected system message, got {msg:?}");
        };
        assert!(system.is_init());
        assert_eq!(system.tools, vec!["Read", "Bash"]);
        assert_eq!(system.data.get("apiKeySource"), Some(&json!("none")));
        assert_eq!(msg.session_id(), Some("sess-1"));
    }

    #[test]
    fn decodes_assistant_text() {
        let msg = Message::from_value(json!({
            "type": "assistant",
            "message": {
                "id": "msg_1",
                "model": "claude-sonnet-4-5",
                "content": [
                    {"type": "text", "text": "Hello, "},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "text", "text": "world"}
                ],
                "stop_reason": "tool_use"
            },
            "parent_tool_use_id": null,
            "session_id": "sess-1"
        }));

        assert_eq!(msg.as_assistant().unwrap().message.text(), "Hello, world");
    }

    #[test]
    fn decodes_result() {
        let msg = Message::from_value(json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "duration_ms": 1200,
            "num_turns": 2,
            "result": "done",
            "total_cost_usd": 0.0042,
            "session_id": "sess-1"
        }));

        assert!(msg.is_result());
        assert!(msg.as_result().unwrap().is_success());
        assert_eq!(msg.message_type(), "result");
    }

    #[test]
    fn decodes_user_echo_with_string_content() {
        let msg = Message::from_value(json!({
            "type": "user",
            "message": {"role": "user", "content": "hi"},
            "session_id": "s"
        }));
        assert!(matches!(
            msg,
            Message::User(UserMessage { message: UserMessageBody { content: UserContent::Text(ref t), .. }, .. }) if t == "hi"
        ));
    }

    #[test]
    fn unknown_types_are_preserved() {
        let raw = json!({"type": "rate_limit", "session_id": "s", "retry_after": 3});
        let msg = Message::from_value(raw.clone());
        assert_eq!(msg.message_type(), "rate_limit");
        assert_eq!(msg.session_id(), Some("s"));
        assert_eq!(
            msg,
            Message::Unknown {
                message_type: "rate_limit".into(),
                raw
            }
        );
    }

    #[test]
    fn missing_type_is_kept_raw() {
        let raw = json!({"subtype": "init"});
        let msg = Message::from_value(raw.clone());
        assert_eq!(
            msg,
            Message::Unknown {
                message_type: String::new(),
                raw
            }
        );
    }

    #[test]
    fn mismatched_known_type_is_kept_raw() {
        let raw = json!({"type": "assistant", "message": 5, "session_id": "s"});
        let msg = Message::from_value(raw.clone());
        assert_eq!(msg.message_type(), "assistant");
        assert_eq!(msg.session_id(), Some("s"));
        assert!(matches!(msg, Message::Unknown { raw: ref r, .. } if *r == raw));
    }

    #[test]
    fn user_echo_without_content_is_kept_raw() {
        let msg = Message::from_value(json!({"type": "user", "message": {"role": "user"}}));
        assert_eq!(msg.message_type(), "user");
        assert!(matches!(msg, Message::Unknown { .. }));
    }

    #[test]
    fn result_without_subtype_still_ends_the_turn() {
        let msg = Message::from_value(json!({"type": "result", "x": 1}));
        assert!(msg.is_result());
        let result = msg.as_result().unwrap();
        assert_eq!(result.subtype, "");
        assert!(!result.is_success());
    }
}
