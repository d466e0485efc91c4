//! Subprocess transport: a supervised CLI process behind a message stream.
//!
//! A [`SubprocessTransport`] owns exactly one CLI process. It offers three
//! ways to drive it:
//!
//! | Mode | Arguments | stdin | Stream ends |
//! |------|-----------|-------|-------------|
//! | [`execute`](SubprocessTransport::execute) | one-shot (`--print`) | prompt, then closed | after the result message |
//! | [`execute_stream`](SubprocessTransport::execute_stream) | streaming | fed from a prompt stream | when stdout closes or a prompt cannot be written |
//! | [`connect`](SubprocessTransport::connect) | streaming | open for [`send`](SubprocessTransport::send) | when stdout closes |
//!
//! Messages reach the caller through a [`MessageStream`] in the exact order
//! the CLI wrote them. Control responses are routed aside to whoever is
//! waiting in [`send_control_request`](SubprocessTransport::send_control_request).

mod control;
mod decoder;

use std::pin::{pin, Pin};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub use control::next_request_id;
pub use decoder::{FrameBuffer, FrameDecoder};

use self::control::ControlTable;
use self::decoder::{dispatch_frames, StreamEnd};
use crate::config::{SessionId, TransportConfig};
use crate::process::{build_args, LifecycleState, ProcessSupervisor};
use crate::protocol::{self, Message};
use crate::{Error, Result};

/// Capacity of the channel between the decoder task and the stream.
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// How long a closed stdout waits for the exit status before the stream
/// ends without one.
pub const EXIT_STATUS_WAIT: Duration = Duration::from_secs(1);

/// State shared by the caller side and the decoder task.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) control: ControlTable,
    session_id: Mutex<Option<SessionId>>,
}

impl Shared {
    pub(crate) fn record_session(&self, id: &str) {
        let mut current = self
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().map(SessionId::as_str) != Some(id) {
            debug!(session_id = id, "observed session");
            *current = Some(SessionId::new(id));
        }
    }

    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// How the decoder task treats the end of a turn.
#[derive(Debug, Clone, Copy)]
struct StreamPolicy {
    close_on_result: bool,
    /// Terminate the process once the stream is finished.
    terminate_when_done: bool,
}

/// Messages decoded from the CLI stdout.
///
/// Yields `Ok` messages in arrival order and at most one `Err`, after which
/// the stream ends.
///
/// After the CLI closes stdout the stream waits up to [`EXIT_STATUS_WAIT`]
/// for the exit status, so a non-zero exit surfaces as
/// [`Error::UnexpectedTermination`] before the stream ends.
///
/// Dropping the stream stops decoding. Processes started by
/// [`execute`](SubprocessTransport::execute) and
/// [`execute_stream`](SubprocessTransport::execute_stream) are then
/// terminated; a [`connect`](SubprocessTransport::connect)ed process keeps
/// running until [`SubprocessTransport::close`].
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl MessageStream {
    /// Collect messages up to and including the first result message.
    ///
    /// # Errors
    ///
    /// The first error the stream yields.
    pub async fn collect_until_result(mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await {
            let message = message?;
            let done = message.is_result();
            messages.push(message);
            if done {
                break;
            }
        }
        Ok(messages)
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

/// Drives one CLI process over stdin/stdout.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use claude_transport::{SubprocessTransport, TransportConfig};
///
/// let transport = SubprocessTransport::new(TransportConfig::default());
/// let mut messages = transport.connect().await?;
/// transport.send(&serde_json::json!({
///     "type": "user",
///     "message": {"role": "user", "content": "hello"},
///     "parent_tool_use_id": null,
///     "session_id": "default"
/// })).await?;
/// while let Some(message) = messages.next().await {
///     let message = message?;
///     if message.is_result() {
///         break;
///     }
/// }
/// transport.close().await;
/// ```
#[derive(Debug)]
pub struct SubprocessTransport {
    config: Arc<TransportConfig>,
    supervisor: Arc<ProcessSupervisor>,
    shared: Arc<Shared>,
}

impl SubprocessTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_shared_config(Arc::new(config))
    }

    pub fn with_shared_config(config: Arc<TransportConfig>) -> Self {
        let supervisor =
            ProcessSupervisor::new(config.cli_command()).with_inherit_env(config.inherit_env());
        Self {
            config,
            supervisor: Arc::new(supervisor),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn state(&self) -> LifecycleState {
        self.supervisor.state()
    }

    /// Session id most recently reported by the CLI.
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.session_id()
    }

    /// Run a single prompt in one-shot mode.
    ///
    /// The prompt is written to stdin, which is then closed. The stream ends
    /// after the result message and the process is terminated afterwards.
    pub async fn execute(&self, prompt: &str) -> Result<MessageStream> {
        let stdout = self.launch(false).await?;

        // stdout is drained while the prompt is written, so a CLI that talks
        // before reading all of stdin cannot stall on a full pipe.
        let messages = self.spawn_reader(
            stdout,
            StreamPolicy {
                close_on_result: true,
                terminate_when_done: true,
            },
            None,
        );

        if let Err(e) = self.supervisor.write(prompt.as_bytes()).await {
            warn!(error = %e, "failed to write prompt");
            self.supervisor.terminate().await;
            return Err(e);
        }
        self.supervisor.close_stdin().await;

        Ok(messages)
    }

    /// Run a sequence of prompt objects in streaming mode.
    ///
    /// A background writer serializes each prompt to one JSON line. With
    /// `close_after`, stdin is closed once the sequence is exhausted.
    ///
    /// A prompt that cannot be written ends the stream with that error. The
    /// process is terminated once the stream ends or is dropped.
    pub async fn execute_stream<S>(&self, prompts: S, close_after: bool) -> Result<MessageStream>
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        let stdout = self.launch(true).await?;

        let (failed_tx, failed_rx) = oneshot::channel();
        let messages = self.spawn_reader(
            stdout,
            StreamPolicy {
                close_on_result: false,
                terminate_when_done: true,
            },
            Some(failed_rx),
        );

        let supervisor = Arc::clone(&self.supervisor);
        let writer = tokio::spawn(async move {
            let mut prompts = pin!(prompts);
            while let Some(prompt) = prompts.next().await {
                let written = match encode_line(&prompt) {
                    Ok(line) => supervisor.write(&line).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!(error = %e, "prompt writer stopped");
                    let _ = failed_tx.send(e);
                    return;
                }
            }
            if close_after {
                supervisor.close_stdin().await;
            }
        });
        self.supervisor.track(writer);

        Ok(messages)
    }

    /// Start a persistent streaming session with stdin left open.
    pub async fn connect(&self) -> Result<MessageStream> {
        let stdout = self.launch(true).await?;
        Ok(self.spawn_reader(
            stdout,
            StreamPolicy {
                close_on_result: false,
                terminate_when_done: false,
            },
            None,
        ))
    }

    async fn launch(&self, streaming: bool) -> Result<ChildStdout> {
        let args = build_args(streaming, &self.config);
        debug!(?args, streaming, "launching CLI");
        self.supervisor
            .start(&args, self.config.working_directory(), &self.config.build_env())
            .await
    }

    /// Decode stdout into a new stream. An error received on `writer_failed`
    /// ends the stream in place of further output.
    fn spawn_reader(
        &self,
        stdout: ChildStdout,
        policy: StreamPolicy,
        writer_failed: Option<oneshot::Receiver<Error>>,
    ) -> MessageStream {
        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let supervisor = Arc::clone(&self.supervisor);
        let shared = Arc::clone(&self.shared);
        let max_buffer_size = self.config.max_buffer_size();
        let cancel = supervisor.cancellation_token();

        let reader = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(stdout, max_buffer_size);
            let writer_failure = async move {
                match writer_failed {
                    Some(rx) => match rx.await {
                        Ok(e) => e,
                        // Writer finished cleanly.
                        Err(_) => std::future::pending().await,
                    },
                    None => std::future::pending().await,
                }
            };
            let outcome = tokio::select! {
                outcome = dispatch_frames(&mut decoder, &shared, &tx, policy.close_on_result) => outcome,
                e = writer_failure => Err(e),
                () = tx.closed() => Ok(StreamEnd::ReceiverDropped),
                () = cancel.cancelled() => return,
            };

            match outcome {
                Ok(StreamEnd::Eof) => {
                    if let Some(err) = unexpected_exit(&supervisor).await {
                        warn!(error = %err, "CLI exited unexpectedly");
                        let _ = tx.send(Err(err)).await;
                    }
                }
                Ok(StreamEnd::ResultReceived) | Ok(StreamEnd::ReceiverDropped) => {}
                Err(e) => {
                    warn!(error = %e, "message stream failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
            drop(tx);

            if policy.terminate_when_done {
                // Detached: terminate aborts tracked tasks, this one included.
                tokio::spawn(async move { supervisor.terminate().await });
            }
        });
        self.supervisor.track(reader);

        MessageStream { rx }
    }

    /// Write one message as a JSON line.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the process is not running.
    pub async fn send(&self, message: &Value) -> Result<()> {
        let state = self.supervisor.state();
        if state != LifecycleState::Running {
            return Err(Error::invalid_state(format!(
                "cannot send while transport is {state}"
            )));
        }
        self.supervisor.write(&encode_line(message)?).await
    }

    /// Send several messages, each normalized to the minimal user envelope.
    ///
    /// Messages without a `session_id` get `session_id`, or the session the
    /// CLI reported, or `"default"`.
    pub async fn send_batch(
        &self,
        messages: impl IntoIterator<Item = Value>,
        session_id: Option<&str>,
    ) -> Result<()> {
        let known = self.session_id();
        let session = session_id
            .or(known.as_ref().map(SessionId::as_str))
            .unwrap_or(protocol::DEFAULT_SESSION_ID);
        for message in messages {
            self.send(&protocol::normalize_outgoing(message, session))
                .await?;
        }
        Ok(())
    }

    /// Ask the CLI to interrupt the current turn without waiting for a reply.
    pub async fn interrupt(&self) -> Result<()> {
        let request_id = next_request_id();
        debug!(%request_id, "sending interrupt");
        self.send(&protocol::control_request(
            &request_id,
            protocol::interrupt_request(),
        ))
        .await
    }

    /// Send a control request and wait for its response payload.
    ///
    /// Waits up to `timeout`, or the configured control timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when no response arrives in time
    /// - [`Error::Connection`] when the CLI answers with an error response
    /// - [`Error::InvalidState`] when the transport is not running or is
    ///   closed while waiting
    pub async fn send_control_request(
        &self,
        request: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let request_id = next_request_id();
        self.shared.control.register(&request_id);

        if let Err(e) = self
            .send(&protocol::control_request(&request_id, request))
            .await
        {
            self.shared.control.forget(&request_id);
            return Err(e);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.control_timeout());
        let cancel = self.supervisor.cancellation_token();
        let response = tokio::select! {
            response = self.shared.control.wait(&request_id, timeout) => response?,
            () = cancel.cancelled() => {
                self.shared.control.forget(&request_id);
                return Err(Error::invalid_state("transport closed while awaiting control response"));
            }
        };

        if response.is_error() {
            return Err(Error::connection(format!(
                "control request {request_id} failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(response.response.unwrap_or_else(|| json!({})))
    }

    /// Signal end of input while keeping the process running.
    pub async fn close_stdin(&self) {
        self.supervisor.close_stdin().await;
    }

    /// Terminate the process and release its resources. Idempotent.
    pub async fn close(&self) {
        self.supervisor.terminate().await;
    }

    /// Captured stderr of the process so far; empty after [`close`](Self::close).
    pub async fn stderr(&self) -> String {
        self.supervisor.stderr_contents().await
    }
}

fn encode_line(message: &Value) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// After stdout closed: a non-zero exit while nobody asked the process to
/// stop is a failure.
async fn unexpected_exit(supervisor: &ProcessSupervisor) -> Option<Error> {
    let exited = tokio::time::timeout(EXIT_STATUS_WAIT, supervisor.wait_for_exit()).await;
    let Ok(Ok(code)) = exited else {
        return None;
    };
    match code {
        Some(0) => None,
        _ if supervisor.state() != LifecycleState::Running => None,
        code => Some(Error::UnexpectedTermination {
            exit_code: code,
            stderr: supervisor.stderr_contents().await,
        }),
    }
}
