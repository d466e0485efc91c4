use std::time::Duration;

/// Errors that can occur when driving the Claude CLI subprocess.
///
/// Errors are organized by category:
/// - State errors: an operation the lifecycle does not allow right now
/// - Connection errors: launch failures and OS-level I/O failures
/// - Decode errors: malformed or oversize JSON framing on stdout
/// - Timeouts: a bounded wait expired
/// - Unexpected termination: the CLI exited while it was expected to run
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // State errors
    // -------------------------------------------------------------------------
    /// Operation attempted while the lifecycle forbids it.
    ///
    /// Examples: writing after stdin was closed, sending before the process
    /// was started, starting a supervisor twice.
    #[error("invalid state: {0}")]
    InvalidState(String),

    // -------------------------------------------------------------------------
    // Connection errors
    // -------------------------------------------------------------------------
    /// The CLI could not be launched, or communication with it failed.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // -------------------------------------------------------------------------
    // Protocol errors
    // -------------------------------------------------------------------------
    /// Malformed or oversize JSON framing on the CLI stdout.
    #[error("decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // -------------------------------------------------------------------------
    // Runtime errors
    // -------------------------------------------------------------------------
    /// A bounded wait expired.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The CLI process exited while the caller expected it to keep running.
    #[error("CLI process exited unexpectedly (exit code {exit_code:?}){}", stderr_suffix(.stderr))]
    UnexpectedTermination {
        exit_code: Option<i32>,
        /// Captured stderr of the process, possibly empty.
        stderr: String,
    },
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed.chars().take(500).collect::<String>())
    }
}

impl Error {
    /// Create an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a connection error without an underlying I/O cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping an I/O failure.
    pub fn io(context: &str, source: std::io::Error) -> Self {
        Self::Connection {
            message: format!("{context}: {source}"),
            source: Some(source),
        }
    }

    /// Create a decode error without an underlying parser cause.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error with context from the raw input.
    pub fn json_parse(source: serde_json::Error, raw: &str) -> Self {
        Self::Decode {
            message: format!(
                "at line {} column {}: {}",
                source.line(),
                source.column(),
                raw.chars().take(100).collect::<String>()
            ),
            source: Some(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if retrying with a fresh process may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Connection { .. } | Error::UnexpectedTermination { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
