//! Error types for ESL socket operations.
//!
//! All fallible operations in this crate return [`EslResult<T>`].  Errors
//! fall into the groups callers act on differently:
//!
//! - **Local validation** ([`EslError::InvalidCommand`], [`EslError::SendEventEmpty`]):
//!   nothing was written, the connection is still usable.
//! - **Decode failures** (`ReadHeaders`, `InvalidContentLength`, `ReadBody`,
//!   `Json`): delivered on the error queue, always followed by the end of the
//!   decode loop and the socket being closed.
//! - **Handshake failures** (`UnexpectedAuthHeader`, `AuthRejected`, `Timeout`):
//!   returned from connection setup.
//!
//! Timeouts inside the decode loop are not errors; they are retried.

use thiserror::Error;

/// Result type alias for ESL operations
pub type EslResult<T> = Result<T, EslError>;

/// Error types for ESL operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EslError {
    /// Command text contains a line break and would corrupt framing
    #[error("Invalid command provided. Command cannot contain \\r and/or \\n. Provided command is: {command:?}")]
    InvalidCommand { command: String },

    /// Header block could not be read
    #[error("Error while reading headers: {0}")]
    ReadHeaders(#[source] std::io::Error),

    /// Content-Length header is not a usable byte count
    #[error("Unable to get size of content-length {value:?}: {reason}")]
    InvalidContentLength { value: String, reason: String },

    /// Frame body could not be read
    #[error("Error while reading body: {0}")]
    ReadBody(#[source] std::io::Error),

    /// Content-Type is not one the decoder handles
    #[error("Unsupported message type: {content_type:?}")]
    UnsupportedContentType { content_type: String },

    /// text/event-json body is not a JSON object
    #[error("Error while decoding JSON event: {0}")]
    Json(#[from] serde_json::Error),

    /// First frame after dialing was not an auth request
    #[error("Expected auth/request content type, got {content_type:?}")]
    UnexpectedAuthHeader { content_type: String },

    /// The switch did not accept the password
    #[error("Could not authenticate with provided password: {reply_text}")]
    AuthRejected { reply_text: String },

    /// sendevent called without any header line
    #[error("Must send at least one event header")]
    SendEventEmpty,

    /// IO error from underlying TCP operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial or handshake deadline expired
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Write attempted after the connection was closed
    #[error("Not connected to FreeSWITCH")]
    NotConnected,

    /// The decode loop has ended and every queued item was received
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection's decode loop was already started once
    #[error("Decode loop already started for connection {id}")]
    DecodeLoopStarted { id: String },
}

impl EslError {
    pub fn invalid_command(command: impl Into<String>) -> Self {
        Self::InvalidCommand {
            command: command.into(),
        }
    }

    /// `true` if the failing call wrote nothing and the connection is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EslError::InvalidCommand { .. }
                | EslError::SendEventEmpty
                | EslError::UnsupportedContentType { .. }
                | EslError::DecodeLoopStarted { .. }
        )
    }

    /// `true` if the TCP session is dead or suspect and the caller should
    /// close it and reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EslError::Io(_)
                | EslError::ReadHeaders(_)
                | EslError::ReadBody(_)
                | EslError::InvalidContentLength { .. }
                | EslError::Json(_)
                | EslError::NotConnected
                | EslError::ConnectionClosed
        )
    }
}
