//! High-level client for running prompts through the CLI.
//!
//! This module provides [`ClaudeClient`], the main entry point. Each call
//! launches its own CLI process, so one client can serve concurrent requests.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use claude_transport::{ClaudeClient, Message, Result, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClaudeClient::with_config(
//!         TransportConfig::builder().max_turns(1).build(),
//!     );
//!
//!     // One-shot, collected
//!     for message in client.query_collect("What is 2+2?").await? {
//!         if let Message::Assistant(assistant) = message {
//!             println!("{}", assistant.message.text());
//!         }
//!     }
//!
//!     // One-shot, streamed
//!     let mut stream = client.query("Write a haiku").await?;
//!     while let Some(message) = stream.next().await {
//!         let _ = message?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use futures::Stream;
use serde_json::Value;

use crate::config::TransportConfig;
use crate::protocol::Message;
use crate::session::ConnectionManager;
use crate::transport::{MessageStream, SubprocessTransport};
use crate::Result;

/// A client for the Claude CLI.
///
/// `ClaudeClient` holds an immutable configuration snapshot and offers:
/// - One-shot requests ([`query`](Self::query), [`query_collect`](Self::query_collect))
/// - Streamed input ([`query_stream`](Self::query_stream))
/// - Persistent connections ([`connect`](Self::connect))
///
/// # Thread Safety
///
/// `ClaudeClient` is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ClaudeClient {
    config: Arc<TransportConfig>,
}

impl ClaudeClient {
    /// Create a client with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run one prompt. The stream ends after the result message and the
    /// process is terminated once the stream finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the CLI cannot be launched or the prompt cannot
    /// be written.
    pub async fn query(&self, prompt: &str) -> Result<MessageStream> {
        SubprocessTransport::with_shared_config(Arc::clone(&self.config))
            .execute(prompt)
            .await
    }

    /// Run one prompt and collect every message up to the result.
    pub async fn query_collect(&self, prompt: &str) -> Result<Vec<Message>> {
        self.query(prompt).await?.collect_until_result().await
    }

    /// Feed a sequence of message objects in streaming mode.
    ///
    /// stdin is closed once `prompts` is exhausted, which lets the CLI finish
    /// and close the stream. The process is terminated when the stream ends
    /// or is dropped.
    pub async fn query_stream<S>(&self, prompts: S) -> Result<MessageStream>
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        SubprocessTransport::with_shared_config(Arc::clone(&self.config))
            .execute_stream(prompts, true)
            .await
    }

    /// Open a persistent connection.
    pub async fn connect(&self) -> Result<ConnectionManager> {
        let manager = ConnectionManager::with_shared_config(Arc::clone(&self.config));
        manager.connect().await?;
        Ok(manager)
    }
}
