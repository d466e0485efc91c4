//! Incremental JSON framing of the CLI stdout.

use std::collections::VecDeque;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, trace};

use super::Shared;
use crate::protocol::{ControlResponse, Message};
use crate::{Error, Result};

/// Accumulates line fragments until they form complete JSON objects.
///
/// Tolerates several objects on one line, one object spread over several
/// lines, and blank lines. Incomplete JSON is never an error; exceeding the
/// size limit or malformed JSON is.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: String,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: String::new(),
            max_size,
        }
    }

    /// Bytes of an incomplete frame currently held.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feed one line of input, pushing every frame it completes onto `frames`.
    ///
    /// Frames completed before a failure are still pushed. On failure the
    /// buffer is reset.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] when the buffered frame would exceed the maximum
    /// size, when the input is not valid JSON, or when a complete value is
    /// not an object.
    pub fn push_line(&mut self, line: &str, frames: &mut Vec<Value>) -> Result<()> {
        for fragment in line.split('\n').map(str::trim) {
            if fragment.is_empty() {
                continue;
            }

            let size = self.buf.len() + fragment.len();
            if size > self.max_size {
                self.buf.clear();
                return Err(Error::decode(format!(
                    "JSON frame of {size} bytes exceeds maximum buffer size of {} bytes",
                    self.max_size
                )));
            }

            self.buf.push_str(fragment);
            if let Err(e) = self.drain_complete(frames) {
                self.buf.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    fn drain_complete(&mut self, frames: &mut Vec<Value>) -> Result<()> {
        let mut values = serde_json::Deserializer::from_str(&self.buf).into_iter::<Value>();
        let mut consumed = 0;

        let outcome = loop {
            match values.next() {
                None => break Ok(()),
                Some(Ok(value)) => {
                    consumed = values.byte_offset();
                    if !value.is_object() {
                        break Err(Error::decode(format!(
                            "expected a JSON object, got {}",
                            value.to_string().chars().take(100).collect::<String>()
                        )));
                    }
                    frames.push(value);
                }
                // Incomplete; wait for more input.
                Some(Err(e)) if e.is_eof() => break Ok(()),
                Some(Err(e)) => break Err(Error::json_parse(e, &self.buf)),
            }
        };

        self.buf.drain(..consumed);
        outcome
    }
}

/// Reads frames from an async byte stream.
///
/// Lines are limited to the maximum buffer size as well, so a single
/// unterminated line cannot grow without bound.
pub struct FrameDecoder<R> {
    lines: FramedRead<R, LinesCodec>,
    buffer: FrameBuffer,
    ready: VecDeque<Value>,
    failure: Option<Error>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R, max_buffer_size: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_buffer_size)),
            buffer: FrameBuffer::new(max_buffer_size),
            ready: VecDeque::new(),
            failure: None,
            finished: false,
        }
    }

    /// Next complete frame, or `Ok(None)` at end of input.
    ///
    /// An error is terminal: every later call returns `Ok(None)`.
    pub async fn next_frame(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if let Some(e) = self.failure.take() {
                self.finished = true;
                return Err(e);
            }
            if self.finished {
                return Ok(None);
            }

            match self.lines.next().await {
                None => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        debug!(
                            bytes = self.buffer.len(),
                            "discarding incomplete frame at end of output"
                        );
                    }
                    return Ok(None);
                }
                Some(Ok(line)) => {
                    let mut frames = Vec::new();
                    if let Err(e) = self.buffer.push_line(&line, &mut frames) {
                        self.failure = Some(e);
                    }
                    self.ready.extend(frames);
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.finished = true;
                    return Err(Error::decode(format!(
                        "line exceeds maximum buffer size of {} bytes",
                        self.buffer.max_size
                    )));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    self.finished = true;
                    return Err(Error::io("failed to read CLI stdout", e));
                }
            }
        }
    }
}

/// Why dispatching stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// The CLI closed stdout.
    Eof,
    /// A result message was emitted under the close-on-result policy.
    ResultReceived,
    /// The consumer dropped the stream.
    ReceiverDropped,
}

/// Route decoded frames until the input ends.
///
/// Control responses go to the control table; everything else is decoded
/// into a [`Message`] and sent downstream in arrival order.
pub(crate) async fn dispatch_frames<R: AsyncRead + Unpin>(
    decoder: &mut FrameDecoder<R>,
    shared: &Shared,
    tx: &mpsc::Sender<Result<Message>>,
    close_on_result: bool,
) -> Result<StreamEnd> {
    while let Some(frame) = decoder.next_frame().await? {
        if let Some(response) = ControlResponse::from_frame(&frame) {
            shared.control.complete(response);
            continue;
        }

        let message = Message::from_value(frame);
        trace!(message_type = message.message_type(), "decoded message");
        if let Some(id) = message.session_id() {
            shared.record_session(id);
        }

        let is_result = message.is_result();
        if tx.send(Ok(message)).await.is_err() {
            return Ok(StreamEnd::ReceiverDropped);
        }
        if close_on_result && is_result {
            return Ok(StreamEnd::ResultReceived);
        }
    }
    Ok(StreamEnd::Eof)
}
