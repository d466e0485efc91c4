//! Process management for the Claude CLI.
//!
//! This module builds the CLI command line and supervises the child process
//! for its whole lifetime.
//!
//! # Architecture
//!
//! ```text
//! transport                              claude CLI
//! ┌──────────────────┐                  ┌─────────────┐
//! │ ProcessSupervisor│───stdin (JSON)──▶│             │
//! │    FrameDecoder  │◀──stdout (JSON)──│             │
//! │   stderr tmpfile │◀──stderr (logs)──│             │
//! └──────────────────┘                  └─────────────┘
//! ```
//!
//! The argument vector comes from [`build_args`]; the supervisor owns stdin,
//! the stderr sink and the exit status, and hands stdout to exactly one
//! decoder.

mod args;
mod supervisor;

pub use args::build_args;
pub use supervisor::{
    LifecycleState, ProcessExit, ProcessSupervisor, GRACEFUL_SHUTDOWN_TIMEOUT, KILL_GRACE_PERIOD,
};
