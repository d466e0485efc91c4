//! JSON protocol types for the CLI stream-json mode.
//!
//! Both directions carry newline-delimited JSON objects keyed by a `type`
//! discriminator:
//!
//! - stdout (CLI → transport): [`Message`]s, plus `control_response`
//!   envelopes that answer control requests
//! - stdin (transport → CLI): user messages and `control_request` envelopes
//!
//! # Example
//!
//! ```
//! use claude_transport::protocol::Message;
//!
//! let value = serde_json::json!({"type": "result", "subtype": "success", "session_id": "s"});
//! let msg = Message::from_value(value);
//! assert!(msg.is_result());
//! ```

pub mod control;
mod content;
mod messages;

pub use content::{ContentBlock, UserContent};
pub use control::{
    control_request, interrupt_request, normalize_outgoing, user_message, ControlResponse,
    DEFAULT_SESSION_ID,
};
pub use messages::{
    AssistantContent, AssistantMessage, InboundControlRequest, Message, ResultMessage,
    StreamEventMessage, SystemMessage, UserMessage, UserMessageBody,
};
