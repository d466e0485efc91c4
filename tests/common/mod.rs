//! Test utilities for claude-transport integration tests.
//!
//! Tests run the real spawn → decode → terminate path against small shell
//! scripts that impersonate the CLI.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_transport::{LifecycleState, SubprocessTransport, TransportConfig, TransportConfigBuilder};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Route crate logs to the test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An executable script standing in for the CLI.
///
/// Every invocation appends its arguments, one per line, followed by a `---`
/// separator to an args file.
pub struct FakeCli {
    dir: TempDir,
    path: PathBuf,
    args_file: PathBuf,
}

impl FakeCli {
    /// Create a fake CLI running `body` as a POSIX shell script.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("claude");
        let args_file = dir.path().join("args.log");

        let script = format!(
            "#!/bin/sh\n\
             for arg in \"$@\"; do printf '%s\\n' \"$arg\" >> \"$FAKE_CLI_ARGS\"; done\n\
             printf -- '---\\n' >> \"$FAKE_CLI_ARGS\"\n\
             {body}\n"
        );
        fs::write(&path, script).expect("write fake cli");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cli");

        Self {
            dir,
            path,
            args_file,
        }
    }

    /// A fake CLI that prints a fixed scenario, ignoring stdin.
    pub fn scripted(scenario: &ScenarioBuilder) -> Self {
        Self::new(&scenario.script())
    }

    /// A persistent-mode fake CLI.
    ///
    /// Announces session `sess-echo`, answers every control request with
    /// `{"ack": true}`, and answers every other line with an assistant
    /// message and a result. Exits when stdin closes.
    pub fn echo() -> Self {
        Self::new(ECHO_BODY)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration builder pointing at this script.
    pub fn config(&self) -> TransportConfigBuilder {
        TransportConfig::builder()
            .cli_path(&self.path)
            .env("FAKE_CLI_ARGS", self.args_file.display().to_string())
    }

    /// Arguments of every invocation so far, in launch order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        let Ok(log) = fs::read_to_string(&self.args_file) else {
            return Vec::new();
        };
        let mut invocations = Vec::new();
        let mut current = Vec::new();
        for line in log.lines() {
            if line == "---" {
                invocations.push(std::mem::take(&mut current));
            } else {
                current.push(line.to_string());
            }
        }
        invocations
    }

    /// Wait until at least `count` invocations were logged.
    pub async fn wait_for_invocations(&self, count: usize) -> Vec<Vec<String>> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let invocations = self.invocations();
                if invocations.len() >= count {
                    return invocations;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("fake cli should have been invoked")
    }
}

const ECHO_BODY: &str = r#"
printf '%s\n' '{"type":"system","subtype":"init","session_id":"sess-echo"}'
while IFS= read -r line; do
  case "$line" in
    *'"control_request"'*)
      id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"ack":true}}}\n' "$id"
      ;;
    *)
      printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"echo"}]},"session_id":"sess-echo"}'
      printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"num_turns":1,"session_id":"sess-echo"}'
      ;;
  esac
done
"#;

/// Builder for realistic stdout sequences.
pub struct ScenarioBuilder {
    lines: Vec<String>,
    session_id: String,
    trailer: String,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            session_id: "test-session-123".to_string(),
            trailer: String::new(),
        }
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    fn push(mut self, value: Value) -> Self {
        self.lines.push(value.to_string());
        self
    }

    /// Add a system init message.
    pub fn system_init(self) -> Self {
        let session_id = self.session_id.clone();
        self.push(json!({
            "type": "system",
            "subtype": "init",
            "cwd": "/tmp",
            "session_id": session_id,
            "tools": ["Read", "Write", "Bash"],
            "model": "claude-sonnet-4-5",
            "permissionMode": "default"
        }))
    }

    /// Add an assistant message with a single text block.
    pub fn assistant_text(self, text: &str) -> Self {
        let session_id = self.session_id.clone();
        self.push(json!({
            "type": "assistant",
            "message": {
                "id": "msg_123",
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": text}],
                "stop_reason": "end_turn"
            },
            "parent_tool_use_id": null,
            "session_id": session_id
        }))
    }

    /// Add a success result message.
    pub fn success_result(self, result_text: &str) -> Self {
        let session_id = self.session_id.clone();
        self.push(json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "duration_ms": 1000,
            "num_turns": 1,
            "result": result_text,
            "total_cost_usd": 0.001,
            "session_id": session_id
        }))
    }

    /// Add a raw stdout line, written verbatim.
    pub fn raw(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    /// Shell commands to run after the scenario was printed.
    pub fn then(mut self, commands: &str) -> Self {
        self.trailer = commands.to_string();
        self
    }

    /// Shell script body: drain stdin, print the scenario, run the trailer.
    pub fn script(&self) -> String {
        format!(
            "cat > /dev/null\ncat <<'SCENARIO'\n{}\nSCENARIO\n{}",
            self.lines.join("\n"),
            self.trailer
        )
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the transport's process has been torn down.
pub async fn wait_terminated(transport: &SubprocessTransport) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while transport.state() != LifecycleState::Terminated {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transport should terminate");
}
