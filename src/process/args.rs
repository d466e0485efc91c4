//! Command-line synthesis for CLI invocations.

use crate::config::TransportConfig;

/// Build the CLI argument vector for a configuration snapshot.
///
/// Pure and deterministic. The CLI parses flag/value pairs positionally, so
/// the order is fixed:
///
/// 1. `--output-format stream-json --verbose`
/// 2. `--input-format stream-json` when `streaming`
/// 3. configuration-derived flags (see below)
/// 4. `--print` when not `streaming`; the prompt itself goes to stdin
///
/// Configuration flags, in order: system prompt, appended system prompt, max
/// turns, allowed tools, disallowed tools, model, permission mode,
/// permission prompt tool, continue, resume, settings, one `--add-dir` per
/// directory, MCP config, partial messages, then extra flags.
pub fn build_args(streaming: bool, config: &TransportConfig) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    if streaming {
        args.push("--input-format".to_string());
        args.push("stream-json".to_string());
    }

    if let Some(ref prompt) = config.system_prompt {
        args.push("--system-prompt".to_string());
        args.push(prompt.clone());
    }

    if let Some(ref prompt) = config.append_system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(prompt.clone());
    }

    if let Some(turns) = config.max_turns {
        args.push("--max-turns".to_string());
        args.push(turns.to_string());
    }

    if !config.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(config.allowed_tools.join(","));
    }

    if !config.disallowed_tools.is_empty() {
        args.push("--disallowedTools".to_string());
        args.push(config.disallowed_tools.join(","));
    }

    if let Some(ref model) = config.model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }

    if let Some(mode) = config.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.to_string());
    }

    if let Some(ref tool) = config.permission_prompt_tool {
        args.push("--permission-prompt-tool".to_string());
        args.push(tool.clone());
    }

    if config.continue_conversation {
        args.push("--continue".to_string());
    }

    if let Some(ref id) = config.resume {
        args.push("--resume".to_string());
        args.push(id.to_string());
    }

    if let Some(ref path) = config.settings {
        args.push("--settings".to_string());
        args.push(path.display().to_string());
    }

    for dir in &config.add_dirs {
        args.push("--add-dir".to_string());
        args.push(dir.display().to_string());
    }

    if let Some(ref servers) = config.mcp_servers {
        args.push("--mcp-config".to_string());
        args.push(servers.to_arg());
    }

    if config.include_partial_messages {
        args.push("--include-partial-messages".to_string());
    }

    for (flag, value) in &config.extra_args {
        args.push(format!("--{flag}"));
        if let Some(value) = value {
            args.push(value.clone());
        }
    }

    if !streaming {
        args.push("--print".to_string());
    }

    args
}
