//! Content block types carried inside assistant and user messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A content block within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// Extended thinking output.
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    /// A tool invocation requested by the assistant.
    ToolUse { id: String, name: String, input: Value },
    /// The result of a tool invocation.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Block kinds this crate does not model (images, documents, ...).
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Text of a text block.
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Name and input of a tool-use block.
    pub fn as_tool_use(&self) -> Option<(&str, &Value)> {
        match self {
            ContentBlock::ToolUse { name, input, .. } => Some((name, input)),
            _ => None,
        }
    }
}

/// User message content: either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_blocks() {
        let blocks: Vec<ContentBlock> = serde_json::from_str(
            r#"[
                {"type": "text", "text": "hi"},
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"path": "/tmp/a"}},
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok", "is_error": false}
            ]"#,
        )
        .unwrap();

        assert_eq!(blocks[0].text(), Some("hi"));
        assert!(matches!(blocks[1], ContentBlock::Thinking { .. }));
        let (name, input) = blocks[2].as_tool_use().unwrap();
        assert_eq!(name, "Read");
        assert_eq!(input["path"], "/tmp/a");
        assert!(matches!(blocks[3], ContentBlock::ToolResult { is_error: Some(false), .. }));
    }

    #[test]
    fn unknown_block_kinds_are_tolerated() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type": "image", "source": {"type": "base64"}}"#).unwrap();
        assert_eq!(block, ContentBlock::Unsupported);
    }

    #[test]
    fn user_content_accepts_string_or_blocks() {
        let text: UserContent = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, UserContent::Text("hello".into()));

        let blocks: UserContent =
            serde_json::from_str(r#"[{"type": "text", "text": "hello"}]"#).unwrap();
        assert!(matches!(blocks, UserContent::Blocks(ref b) if b.len() == 1));
    }
}
