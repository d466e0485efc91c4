//! Configuration for CLI invocations.
//!
//! This module provides:
//!
//! - [`TransportConfig`] and [`TransportConfigBuilder`], the immutable
//!   snapshot every transport is constructed from
//! - Type-safe options like [`Model`], [`PermissionMode`], [`SessionId`] and
//!   [`McpServers`]
//!
//! There is no process-wide configuration. Each transport receives its own
//! snapshot, and changing a live setting means building a new snapshot and
//! reconnecting (see [`ConnectionManager`](crate::ConnectionManager)).
//!
//! # Example
//!
//! ```
//! use claude_transport::config::{McpServers, TransportConfig};
//!
//! let config = TransportConfig::builder()
//!     .system_prompt("You are terse.")
//!     .mcp_servers(McpServers::Path("/etc/claude/mcp.json".into()))
//!     .working_directory("/tmp")
//!     .build();
//! # let _ = config;
//! ```

pub mod builder;
pub mod options;

pub use builder::{
    TransportConfig, TransportConfigBuilder, DEFAULT_CONTROL_TIMEOUT, DEFAULT_MAX_BUFFER_SIZE,
};
pub use options::{McpServers, Model, PermissionMode, SessionId};

/// Environment variable telling the CLI which front-end launched it.
pub const ENV_ENTRYPOINT: &str = "CLAUDE_CODE_ENTRYPOINT";

/// Value of [`ENV_ENTRYPOINT`] for this crate.
pub const ENTRYPOINT: &str = "sdk-rust";
