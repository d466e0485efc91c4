//! # claude-transport
//!
//! Async subprocess transport for the Claude Code CLI.
//!
//! This library drives the CLI over its stream-json protocol:
//! - Command-line synthesis from a typed configuration snapshot
//! - Process supervision with graceful-then-forceful termination
//! - Incremental JSON framing of stdout into typed [`Message`]s
//! - Control requests (such as interrupts) correlated with their responses
//! - Persistent connections that reconnect to the same session when
//!   settings change
//!
//! ## Quick Start
//!
//! ```ignore
//! use claude_transport::{ClaudeClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClaudeClient::new();
//!     let messages = client.query_collect("What is 2+2?").await?;
//!     println!("{} messages", messages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Persistent connections
//!
//! ```ignore
//! use futures::StreamExt;
//! use claude_transport::{ClaudeClient, PermissionMode};
//!
//! let manager = ClaudeClient::new().connect().await?;
//! let mut messages = manager.take_stream().await.expect("fresh connection");
//! manager.send_message("Hello").await?;
//! while let Some(message) = messages.next().await {
//!     if message?.is_result() {
//!         break;
//!     }
//! }
//!
//! // Restarts the CLI with the new mode, resuming the same session.
//! manager.set_permission_mode(PermissionMode::Plan).await?;
//! manager.disconnect().await;
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.

mod client;
pub mod config;
mod error;
pub mod process;
pub mod protocol;
mod session;
pub mod transport;

pub use error::{Error, Result};

pub use client::ClaudeClient;
pub use session::{derive_reconnect_config, ConnectionManager};

pub use config::{
    McpServers, Model, PermissionMode, SessionId, TransportConfig, TransportConfigBuilder,
};

pub use protocol::{ContentBlock, Message, ResultMessage};

pub use process::{build_args, LifecycleState, ProcessSupervisor};

pub use transport::{MessageStream, SubprocessTransport};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_send<T: Send>() {}

    /// Public types must be usable across tasks.
    #[test]
    fn public_types_are_send_sync() {
        assert_send_sync::<ClaudeClient>();
        assert_send_sync::<ConnectionManager>();
        assert_send_sync::<SubprocessTransport>();
        assert_send_sync::<ProcessSupervisor>();

        assert_send_sync::<TransportConfig>();
        assert_send_sync::<TransportConfigBuilder>();
        assert_send_sync::<Model>();
        assert_send_sync::<PermissionMode>();
        assert_send_sync::<SessionId>();
        assert_send_sync::<McpServers>();

        assert_send_sync::<Message>();
        assert_send_sync::<Error>();
    }

    /// MessageStream wraps a receiver: Send, not shared.
    #[test]
    fn message_stream_is_send() {
        assert_send::<MessageStream>();
    }
}
