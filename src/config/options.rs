//! Typed values for the options that shape a CLI invocation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model selection with an escape hatch for full model identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Claude Sonnet alias.
    Sonnet,
    /// Claude Opus alias.
    Opus,
    /// Claude Haiku alias.
    Haiku,
    /// Any other model identifier, passed through verbatim.
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Sonnet => f.write_str("sonnet"),
            Model::Opus => f.write_str("opus"),
            Model::Haiku => f.write_str("haiku"),
            Model::Custom(id) => f.write_str(id),
        }
    }
}

impl From<&str> for Model {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sonnet" => Model::Sonnet,
            "opus" => Model::Opus,
            "haiku" => Model::Haiku,
            _ => Model::Custom(s.to_string()),
        }
    }
}

impl From<String> for Model {
    fn from(s: String) -> Self {
        Model::from(s.as_str())
    }
}

/// Permission mode passed to `--permission-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Prompt for potentially dangerous operations.
    Default,
    /// Auto-approve file edits.
    AcceptEdits,
    /// Read-only planning, no tool execution.
    Plan,
    /// Auto-approve every tool call.
    BypassPermissions,
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        })
    }
}

/// Conversation identifier owned by the CLI.
///
/// The transport never generates one; it threads ids reported by the CLI
/// back into outgoing messages and `--resume` flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// Get the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// MCP server configuration handed to `--mcp-config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpServers {
    /// Server descriptors keyed by name; serialized as `{"mcpServers": {...}}`.
    Servers(BTreeMap<String, Value>),
    /// A complete JSON document passed through as-is.
    Json(String),
    /// Path to a JSON configuration file.
    Path(PathBuf),
}

impl McpServers {
    /// Render the value for the `--mcp-config` argument.
    pub fn to_arg(&self) -> String {
        match self {
            McpServers::Servers(servers) => {
                serde_json::json!({ "mcpServers": servers }).to_string()
            }
            McpServers::Json(raw) => raw.clone(),
            McpServers::Path(path) => path.display().to_string(),
        }
    }
}
