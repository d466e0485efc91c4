//! Transport configuration snapshot and builder.
//!
//! # Example
//!
//! ```
//! use claude_transport::config::{Model, PermissionMode, TransportConfig};
//!
//! let config = TransportConfig::builder()
//!     .model(Model::Opus)
//!     .permission_mode(PermissionMode::AcceptEdits)
//!     .max_turns(3)
//!     .allowed_tools(["Read", "Grep"])
//!     .build();
//!
//! assert_eq!(config.max_turns(), Some(3));
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::options::{McpServers, Model, PermissionMode, SessionId};

/// Default cap on the frame buffer (and on a single stdout line): 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default wait for a control response.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable snapshot of every option that affects a CLI invocation.
///
/// Snapshots are never mutated in place. Use [`TransportConfig::to_builder`]
/// to derive a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    // System prompts
    pub(crate) system_prompt: Option<String>,
    pub(crate) append_system_prompt: Option<String>,
    pub(crate) max_turns: Option<u32>,

    // Tools
    pub(crate) allowed_tools: Vec<String>,
    pub(crate) disallowed_tools: Vec<String>,

    // Model and permissions
    pub(crate) model: Option<Model>,
    pub(crate) permission_mode: Option<PermissionMode>,
    pub(crate) permission_prompt_tool: Option<String>,

    // Session continuation
    pub(crate) continue_conversation: bool,
    pub(crate) resume: Option<SessionId>,

    // Settings, directories, MCP
    pub(crate) settings: Option<PathBuf>,
    pub(crate) add_dirs: Vec<PathBuf>,
    pub(crate) mcp_servers: Option<McpServers>,
    pub(crate) include_partial_messages: bool,
    pub(crate) extra_args: Vec<(String, Option<String>)>,

    // Process options
    pub(crate) cli_path: Option<PathBuf>,
    pub(crate) working_directory: Option<PathBuf>,
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) inherit_env: bool,

    // Transport tuning
    pub(crate) max_buffer_size: usize,
    pub(crate) control_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfigBuilder::default().build()
    }
}

impl TransportConfig {
    /// Create a new builder with default values.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Start a builder pre-populated with this snapshot.
    pub fn to_builder(&self) -> TransportConfigBuilder {
        TransportConfigBuilder {
            inner: self.clone(),
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn append_system_prompt(&self) -> Option<&str> {
        self.append_system_prompt.as_deref()
    }

    pub fn max_turns(&self) -> Option<u32> {
        self.max_turns
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    pub fn disallowed_tools(&self) -> &[String] {
        &self.disallowed_tools
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn permission_mode(&self) -> Option<PermissionMode> {
        self.permission_mode
    }

    pub fn permission_prompt_tool(&self) -> Option<&str> {
        self.permission_prompt_tool.as_deref()
    }

    /// Whether `--continue` will be passed.
    pub fn continue_conversation(&self) -> bool {
        self.continue_conversation
    }

    /// Session passed to `--resume`, if any.
    pub fn resume(&self) -> Option<&SessionId> {
        self.resume.as_ref()
    }

    pub fn settings(&self) -> Option<&Path> {
        self.settings.as_deref()
    }

    pub fn add_dirs(&self) -> &[PathBuf] {
        &self.add_dirs
    }

    pub fn mcp_servers(&self) -> Option<&McpServers> {
        self.mcp_servers.as_ref()
    }

    pub fn include_partial_messages(&self) -> bool {
        self.include_partial_messages
    }

    /// Extra `--flag [value]` pairs, in insertion order.
    pub fn extra_args(&self) -> &[(String, Option<String>)] {
        &self.extra_args
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Upper bound for the frame buffer and for a single stdout line.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Default wait applied to control requests.
    pub fn control_timeout(&self) -> Duration {
        self.control_timeout
    }

    /// The executable to launch, `claude` unless overridden.
    pub fn cli_command(&self) -> &Path {
        self.cli_path
            .as_deref()
            .unwrap_or_else(|| Path::new("claude"))
    }

    /// Whether the child inherits the parent environment.
    pub fn inherit_env(&self) -> bool {
        self.inherit_env
    }

    /// Caller-supplied environment overrides.
    pub fn env_vars(&self) -> &HashMap<String, String> {
        &self.env_vars
    }
}

/// Builder for [`TransportConfig`].
///
/// Building never fails: every field is plain data and absent options are
/// simply omitted from the command line.
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    inner: TransportConfig,
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self {
            inner: TransportConfig {
                system_prompt: None,
                append_system_prompt: None,
                max_turns: None,
                allowed_tools: Vec::new(),
                disallowed_tools: Vec::new(),
                model: None,
                permission_mode: None,
                permission_prompt_tool: None,
                continue_conversation: false,
                resume: None,
                settings: None,
                add_dirs: Vec::new(),
                mcp_servers: None,
                include_partial_messages: false,
                extra_args: Vec::new(),
                cli_path: None,
                working_directory: None,
                env_vars: HashMap::new(),
                inherit_env: true,
                max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
                control_timeout: DEFAULT_CONTROL_TIMEOUT,
            },
        }
    }
}

impl TransportConfigBuilder {
    // -------------------------------------------------------------------------
    // System prompts
    // -------------------------------------------------------------------------

    /// Replace the default system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.system_prompt = Some(prompt.into());
        self
    }

    /// Append to the default system prompt.
    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.append_system_prompt = Some(prompt.into());
        self
    }

    /// Cap the number of agentic turns.
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.inner.max_turns = Some(turns);
        self
    }

    // -------------------------------------------------------------------------
    // Tools
    // -------------------------------------------------------------------------

    pub fn allowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn disallowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    // -------------------------------------------------------------------------
    // Model and permissions
    // -------------------------------------------------------------------------

    pub fn model(mut self, model: impl Into<Model>) -> Self {
        self.inner.model = Some(model.into());
        self
    }

    /// Clear the model so the CLI picks its default.
    pub fn clear_model(mut self) -> Self {
        self.inner.model = None;
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.inner.permission_mode = Some(mode);
        self
    }

    /// MCP tool the CLI should call for permission prompts.
    pub fn permission_prompt_tool(mut self, tool: impl Into<String>) -> Self {
        self.inner.permission_prompt_tool = Some(tool.into());
        self
    }

    // -------------------------------------------------------------------------
    // Session continuation
    // -------------------------------------------------------------------------

    /// Continue the most recent conversation.
    pub fn continue_conversation(mut self, cont: bool) -> Self {
        self.inner.continue_conversation = cont;
        self
    }

    /// Resume a specific conversation.
    pub fn resume(mut self, id: impl Into<SessionId>) -> Self {
        self.inner.resume = Some(id.into());
        self
    }

    /// Drop any `--resume` target.
    pub fn clear_resume(mut self) -> Self {
        self.inner.resume = None;
        self
    }

    // -------------------------------------------------------------------------
    // Settings, directories, MCP, extra flags
    // -------------------------------------------------------------------------

    pub fn settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.settings = Some(path.into());
        self
    }

    /// Grant the CLI access to one more directory.
    pub fn add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.add_dirs.push(dir.into());
        self
    }

    pub fn mcp_servers(mut self, servers: McpServers) -> Self {
        self.inner.mcp_servers = Some(servers);
        self
    }

    /// Stream partial assistant messages.
    pub fn include_partial_messages(mut self, include: bool) -> Self {
        self.inner.include_partial_messages = include;
        self
    }

    /// Pass an arbitrary `--flag value` pair, or a boolean `--flag` when
    /// `value` is `None`. Re-adding a flag replaces its value in place.
    pub fn extra_arg(mut self, flag: impl Into<String>, value: Option<String>) -> Self {
        let flag = flag.into();
        let flag = flag.trim_start_matches('-').to_string();
        match self.inner.extra_args.iter_mut().find(|(f, _)| *f == flag) {
            Some(existing) => existing.1 = value,
            None => self.inner.extra_args.push((flag, value)),
        }
        self
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Path to the CLI executable (default: `claude` from `PATH`).
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.cli_path = Some(path.into());
        self
    }

    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.working_directory = Some(path.into());
        self
    }

    /// Add or override an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.env_vars.insert(key.into(), value.into());
        self
    }

    /// Inherit the parent environment (default: true).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inner.inherit_env = inherit;
        self
    }

    // -------------------------------------------------------------------------
    // Transport tuning
    // -------------------------------------------------------------------------

    /// Maximum bytes the frame buffer may hold before decoding fails.
    pub fn max_buffer_size(mut self, bytes: usize) -> Self {
        self.inner.max_buffer_size = bytes.max(1);
        self
    }

    /// Default wait for control responses.
    pub fn control_timeout(mut self, timeout: Duration) -> Self {
        self.inner.control_timeout = timeout;
        self
    }

    pub fn build(self) -> TransportConfig {
        self.inner
    }
}

impl TransportConfig {
    /// Environment for the child, on top of the inherited one.
    ///
    /// Always carries the entry point marker, plus `PWD` when a working
    /// directory is configured.
    pub(crate) fn build_env(&self) -> HashMap<String, String> {
        let mut env = self.env_vars.clone();
        env.insert(
            super::ENV_ENTRYPOINT.to_string(),
            super::ENTRYPOINT.to_string(),
        );
        if let Some(ref dir) = self.working_directory {
            env.insert("PWD".to_string(), dir.display().to_string());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.cli_command(), Path::new("claude"));
        assert_eq!(config.max_buffer_size(), DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(config.control_timeout(), Duration::from_secs(30));
        assert!(config.inherit_env());
        assert!(config.model().is_none());
        assert!(config.permission_mode().is_none());
        assert!(!config.continue_conversation());
    }

    #[test]
    fn to_builder_preserves_fields() {
        let config = TransportConfig::builder()
            .model("m")
            .max_turns(3)
            .add_dir("/a")
            .env("K", "V")
            .build();
        let derived = config.to_builder().continue_conversation(true).build();

        assert_eq!(derived.model(), Some(&Model::Custom("m".into())));
        assert_eq!(derived.max_turns(), Some(3));
        assert_eq!(derived.add_dirs(), &[PathBuf::from("/a")]);
        assert!(derived.continue_conversation());
        assert!(!config.continue_conversation());
    }

    #[test]
    fn extra_arg_replaces_in_place() {
        let config = TransportConfig::builder()
            .extra_arg("--debug-to-stderr", None)
            .extra_arg("verbose-level", Some("2".into()))
            .extra_arg("debug-to-stderr", Some("yes".into()))
            .build();

        assert_eq!(
            config.extra_args(),
            &[
                ("debug-to-stderr".to_string(), Some("yes".to_string())),
                ("verbose-level".to_string(), Some("2".to_string())),
            ]
        );
    }

    #[test]
    fn build_env_has_entrypoint_and_pwd() {
        let config = TransportConfig::builder()
            .working_directory("/work")
            .env("CUSTOM_VAR", "custom_value")
            .build();

        let env = config.build_env();
        assert_eq!(env.get("CLAUDE_CODE_ENTRYPOINT").map(String::as_str), Some("sdk-rust"));
        assert_eq!(env.get("PWD").map(String::as_str), Some("/work"));
        assert_eq!(env.get("CUSTOM_VAR").map(String::as_str), Some("custom_value"));
    }

    #[test]
    fn max_buffer_size_is_never_zero() {
        let config = TransportConfig::builder().max_buffer_size(0).build();
        assert_eq!(config.max_buffer_size(), 1);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransportConfig>();
        assert_send_sync::<TransportConfigBuilder>();
    }
}
