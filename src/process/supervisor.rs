//! Lifecycle supervision of a single CLI process.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// How long a terminated process gets to exit after the graceful signal.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an interrupted process gets before it is force-killed.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Lifecycle of a supervised process.
///
/// Transitions only move forward: `Idle → Starting → Running → Terminating →
/// Terminated`. A terminated supervisor cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Terminated => "terminated",
        })
    }
}

/// Exit information published by the reaper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Owns one CLI process at a time.
///
/// The supervisor holds the child's stdin and its stderr sink (a temporary
/// file), publishes its exit through a reaper task, and tears everything
/// down in [`terminate`](Self::terminate). Stdout is handed to the caller by
/// [`start`](Self::start) because exactly one decoder reads it.
///
/// All methods take `&self`; share the supervisor through an [`Arc`].
pub struct ProcessSupervisor {
    program: PathBuf,
    inherit_env: bool,
    state: watch::Sender<LifecycleState>,
    /// Serializes `start` against `terminate`.
    op_lock: Mutex<()>,
    stdin: Mutex<Option<ChildStdin>>,
    pid: StdMutex<Option<u32>>,
    stderr_path: StdMutex<Option<TempPath>>,
    exit: StdMutex<Option<watch::Receiver<Option<ProcessExit>>>>,
    force_kill: Arc<Notify>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("program", &self.program)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Create an idle supervisor for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            program: program.into(),
            inherit_env: true,
            state,
            op_lock: Mutex::new(()),
            stdin: Mutex::new(None),
            pid: StdMutex::new(None),
            stderr_path: StdMutex::new(None),
            exit: StdMutex::new(None),
            force_kill: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Whether the child inherits this process's environment (default: true).
    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// OS process id, once started.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    /// Exit information, if the process has already exited.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        lock(&self.exit).as_ref().and_then(|rx| *rx.borrow())
    }

    /// Whether the process is running and has not exited on its own.
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running && self.exit_status().is_none()
    }

    /// Launch the process.
    ///
    /// Creates stdin/stdout pipes and a temporary file for stderr, then
    /// returns the stdout handle for the decoder.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the supervisor is idle
    /// - [`Error::Connection`] if the OS refuses to launch the executable;
    ///   the supervisor ends up terminated
    pub async fn start(
        &self,
        args: &[String],
        working_directory: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<ChildStdout> {
        let _op = self.op_lock.lock().await;

        let mut current = LifecycleState::Idle;
        let claimed = self.state.send_if_modified(|state| {
            current = *state;
            if *state == LifecycleState::Idle {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::invalid_state(format!(
                "cannot start process in state {current}"
            )));
        }

        match self.launch(args, working_directory, env).await {
            Ok(stdout) => {
                self.state.send_if_modified(|state| {
                    if *state == LifecycleState::Starting {
                        *state = LifecycleState::Running;
                        true
                    } else {
                        false
                    }
                });
                Ok(stdout)
            }
            Err(e) => {
                lock(&self.stderr_path).take();
                self.state.send_replace(LifecycleState::Terminated);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        args: &[String],
        working_directory: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<ChildStdout> {
        let stderr_file = tempfile::Builder::new()
            .prefix("claude-stderr-")
            .suffix(".log")
            .tempfile()
            .map_err(|e| Error::io("failed to create stderr sink", e))?;
        let stderr_handle = stderr_file
            .reopen()
            .map_err(|e| Error::io("failed to open stderr sink", e))?;
        *lock(&self.stderr_path) = Some(stderr_file.into_temp_path());

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_handle))
            .kill_on_drop(true);
        if !self.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(env);
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            let context = if e.kind() == std::io::ErrorKind::NotFound {
                format!("CLI not found at {}", self.program.display())
            } else {
                format!("failed to launch {}", self.program.display())
            };
            Error::io(&context, e)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connection("failed to capture CLI stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connection("failed to capture CLI stdout"))?;

        let pid = child.id();
        *lock(&self.pid) = pid;
        *self.stdin.lock().await = Some(stdin);

        let (exit_tx, exit_rx) = watch::channel(None);
        *lock(&self.exit) = Some(exit_rx);

        let force_kill = Arc::clone(&self.force_kill);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = force_kill.notified() => {
                    if let Err(e) = child.start_kill() {
                        debug!(?pid, error = %e, "force kill failed");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!(?pid, error = %e, "failed to wait for CLI process");
                    ProcessExit { code: None }
                }
            };
            debug!(?pid, code = ?exit.code, "CLI process exited");
            exit_tx.send_replace(Some(exit));
        });

        info!(?pid, program = %self.program.display(), "started CLI process");
        Ok(stdout)
    }

    /// Write raw bytes to the process stdin.
    ///
    /// Concurrent writers are serialized; each call's bytes reach the pipe
    /// contiguously.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the process is not running or stdin was
    ///   closed
    /// - [`Error::UnexpectedTermination`] if the process has gone away
    /// - [`Error::Connection`] for other I/O failures
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(Error::invalid_state(format!(
                "cannot write to process in state {state}"
            )));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_state("stdin is closed"))?;

        let written = match stdin.write_all(bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                guard.take();
                drop(guard);
                Err(Error::UnexpectedTermination {
                    exit_code: self.exit_status().and_then(|exit| exit.code),
                    stderr: self.stderr_contents().await,
                })
            }
            Err(e) => Err(Error::io("failed to write to CLI stdin", e)),
        }
    }

    /// Signal end of input without terminating the process. Idempotent.
    pub async fn close_stdin(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "closing CLI stdin failed");
            }
        }
    }

    /// Send a non-fatal interrupt (SIGINT) to a running process.
    ///
    /// Does nothing when the process is not running, and on platforms
    /// without signals.
    pub fn interrupt_signal(&self) {
        if !self.is_running() {
            return;
        }
        if let Some(pid) = self.pid() {
            #[cfg(unix)]
            send_signal(pid, nix::sys::signal::Signal::SIGINT);
            #[cfg(not(unix))]
            debug!(pid, "interrupt signal unsupported on this platform");
        }
    }

    /// Wait until the process exits and return its exit code.
    ///
    /// No timeout is applied here. Returns `Ok(None)` when the process was
    /// ended by a signal.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the process was never started.
    pub async fn wait_for_exit(&self) -> Result<Option<i32>> {
        let rx = lock(&self.exit).clone();
        let mut rx = rx.ok_or_else(|| Error::invalid_state("process was never started"))?;
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            // Reaper gone without publishing; the child was dropped and killed.
            Err(_) => None,
        };
        Ok(exit.and_then(|exit| exit.code))
    }

    /// Token cancelled when termination begins.
    ///
    /// Background tasks select on this to stop before the process is torn
    /// down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Register a background task to be cancelled by [`terminate`](Self::terminate).
    pub fn track(&self, handle: JoinHandle<()>) {
        if self.cancel.is_cancelled() {
            handle.abort();
            return;
        }
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Tear down the process. Never fails and is safe to call repeatedly or
    /// concurrently: only the first caller runs the sequence, the others wait
    /// for it to finish.
    ///
    /// 1. cancel and abort tracked tasks
    /// 2. close stdin
    /// 3. SIGTERM, then wait up to [`GRACEFUL_SHUTDOWN_TIMEOUT`]
    /// 4. SIGINT, then wait up to [`KILL_GRACE_PERIOD`]
    /// 5. force kill
    /// 6. delete the stderr file
    pub async fn terminate(&self) {
        let claimed = self.state.send_if_modified(|state| match state {
            LifecycleState::Idle | LifecycleState::Starting | LifecycleState::Running => {
                *state = LifecycleState::Terminating;
                true
            }
            LifecycleState::Terminating | LifecycleState::Terminated => false,
        });

        if !claimed {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|s| *s == LifecycleState::Terminated).await;
            return;
        }

        // Let an in-flight start finish so its handles are visible here.
        let _op = self.op_lock.lock().await;
        let pid = self.pid();
        debug!(?pid, "terminating CLI process");

        self.cancel.cancel();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }

        self.stdin.lock().await.take();

        if self.exit_status().is_none() && lock(&self.exit).is_some() {
            self.escalate(pid).await;
        }

        if let Some(path) = lock(&self.stderr_path).take() {
            if let Err(e) = path.close() {
                debug!(error = %e, "failed to remove stderr file");
            }
        }

        self.state.send_replace(LifecycleState::Terminated);
        info!(?pid, "CLI process terminated");
    }

    async fn escalate(&self, pid: Option<u32>) {
        #[cfg(unix)]
        if let Some(pid) = pid {
            send_signal(pid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        self.force_kill.notify_one();

        if self.exited_within(GRACEFUL_SHUTDOWN_TIMEOUT).await {
            return;
        }

        warn!(?pid, "CLI process ignored terminate, interrupting");
        #[cfg(unix)]
        if let Some(pid) = pid {
            send_signal(pid, nix::sys::signal::Signal::SIGINT);
        }
        if self.exited_within(KILL_GRACE_PERIOD).await {
            return;
        }

        warn!(?pid, "CLI process still alive, force killing");
        self.force_kill.notify_one();
        if !self.exited_within(KILL_GRACE_PERIOD).await {
            warn!(?pid, "CLI process did not report exit after force kill");
        }
    }

    async fn exited_within(&self, window: Duration) -> bool {
        tokio::time::timeout(window, self.wait_for_exit())
            .await
            .is_ok()
    }

    /// Best-effort read of everything the process wrote to stderr.
    ///
    /// Returns an empty string on any failure, including after
    /// [`terminate`](Self::terminate) removed the file.
    pub async fn stderr_contents(&self) -> String {
        let path = lock(&self.stderr_path)
            .as_ref()
            .map(|path| path.to_path_buf());
        let Some(path) = path else {
            return String::new();
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!(error = %e, "failed to read stderr file");
                String::new()
            }
        }
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid, ?signal, "sent signal"),
        Err(e) => debug!(pid, ?signal, error = %e, "failed to send signal"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> ProcessSupervisor {
        ProcessSupervisor::new("/bin/sh")
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_string(), body.to_string()]
    }

    #[test]
    fn supervisor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProcessSupervisor>();
    }

    #[tokio::test]
    async fn start_runs_and_reports_exit_code() {
        let supervisor = sh();
        assert_eq!(supervisor.state(), LifecycleState::Idle);

        let _stdout = supervisor
            .start(&script("exit 3"), None, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(supervisor.state(), LifecycleState::Running);
        assert!(supervisor.pid().is_some());

        assert_eq!(supervisor.wait_for_exit().await.unwrap(), Some(3));
        supervisor.terminate().await;
        assert_eq!(supervisor.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(&script("sleep 5"), None, &HashMap::new())
            .await
            .unwrap();
        let err = supervisor
            .start(&script("true"), None, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        supervisor.terminate().await;

        let err = supervisor
            .start(&script("true"), None, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn missing_executable_is_connection_error() {
        let supervisor = ProcessSupervisor::new("/nonexistent/claude-binary");
        let err = supervisor
            .start(&[], None, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
        assert_eq!(supervisor.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn write_reaches_stdin_and_env_is_passed() {
        use tokio::io::AsyncReadExt;

        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        let supervisor = sh();
        let mut stdout = supervisor
            .start(&script("read line; echo \"$MARKER:$line\""), None, &env)
            .await
            .unwrap();

        supervisor.write(b"hello\n").await.unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "present:hello\n");
        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn write_after_close_stdin_is_invalid_state() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(&script("cat > /dev/null; sleep 5"), None, &HashMap::new())
            .await
            .unwrap();

        supervisor.close_stdin().await;
        supervisor.close_stdin().await;
        let err = supervisor.write(b"late\n").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn write_before_start_is_invalid_state() {
        let err = sh().write(b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn stderr_is_captured_then_removed() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(&script("echo oops >&2"), None, &HashMap::new())
            .await
            .unwrap();
        supervisor.wait_for_exit().await.unwrap();

        assert_eq!(supervisor.stderr_contents().await, "oops\n");
        supervisor.terminate().await;
        assert_eq!(supervisor.stderr_contents().await, "");
    }

    #[tokio::test]
    async fn terminate_is_idempotent_under_concurrency() {
        let supervisor = Arc::new(sh());
        let _stdout = supervisor
            .start(&script("sleep 30"), None, &HashMap::new())
            .await
            .unwrap();

        let a = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.terminate().await }
        });
        let b = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.terminate().await }
        });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(supervisor.state(), LifecycleState::Terminated);
        assert!(supervisor.exit_status().is_some());
        supervisor.terminate().await;
        assert_eq!(supervisor.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(
                &script("trap '' TERM INT; while true; do sleep 1; done"),
                None,
                &HashMap::new(),
            )
            .await
            .unwrap();

        let started = std::time::Instant::now();
        supervisor.terminate().await;
        assert_eq!(supervisor.state(), LifecycleState::Terminated);
        assert!(supervisor.exit_status().is_some());
        assert!(started.elapsed() >= GRACEFUL_SHUTDOWN_TIMEOUT);
    }

    #[tokio::test]
    async fn terminate_aborts_tracked_tasks() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(&script("sleep 30"), None, &HashMap::new())
            .await
            .unwrap();

        let token = supervisor.cancellation_token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        supervisor.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));
        let never = tokio::spawn(std::future::pending::<()>());
        let never_abort = never.abort_handle();
        supervisor.track(never);

        supervisor.terminate().await;
        let _ = done_rx.await;
        tokio::task::yield_now().await;
        assert!(never_abort.is_finished());
    }

    #[tokio::test]
    async fn terminate_on_idle_supervisor() {
        let supervisor = sh();
        supervisor.terminate().await;
        assert_eq!(supervisor.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn interrupt_signal_stops_default_handler() {
        let supervisor = sh();
        let _stdout = supervisor
            .start(&script("exec sleep 30"), None, &HashMap::new())
            .await
            .unwrap();

        supervisor.interrupt_signal();
        let code = tokio::time::timeout(Duration::from_secs(5), supervisor.wait_for_exit())
            .await
            .expect("process should exit on SIGINT")
            .unwrap();
        assert_eq!(code, None);
        supervisor.terminate().await;
    }
}
