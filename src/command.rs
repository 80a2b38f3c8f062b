//! Outbound command encoding
//!
//! Everything written to the switch is built here as one complete byte
//! block, so the connection can write it under a single lock acquisition.
//! Line breaks inside commands, uuids, field names or values are rejected
//! before anything is built.

use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt;

use crate::{
    constants::*,
    error::{EslError, EslResult},
};

/// Reject text that would terminate a line early and corrupt framing.
pub fn validate_line(line: &str) -> EslResult<()> {
    if line.contains(['\r', '\n']) {
        return Err(EslError::invalid_command(line));
    }
    Ok(())
}

/// Single-line ESL commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EslCommand {
    /// Authenticate with password
    Auth { password: String },
    /// Execute API command
    Api { command: String },
    /// Execute background API command
    BgApi { command: String },
    /// Accept an outbound session
    Connect,
    /// Exit/logout
    Exit,
    /// Any other command line, sent as given
    Raw { command: String },
}

impl EslCommand {
    /// Command line without terminator
    pub fn as_line(&self) -> String {
        match self {
            EslCommand::Auth { password } => format!("auth {}", password),
            EslCommand::Api { command } => format!("api {}", command),
            EslCommand::BgApi { command } => format!("bgapi {}", command),
            EslCommand::Connect => "connect".to_string(),
            EslCommand::Exit => "exit".to_string(),
            EslCommand::Raw { command } => command.clone(),
        }
    }

    /// Convert command to wire format string
    pub fn to_wire_format(&self) -> EslResult<String> {
        command_frame(&self.as_line())
    }
}

/// Display form for logs; never shows the password.
impl fmt::Display for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f.write_str("auth [REDACTED]"),
            other => f.write_str(&other.as_line()),
        }
    }
}

/// `command` followed by the empty-body terminator
pub fn command_frame(command: &str) -> EslResult<String> {
    validate_line(command)?;
    Ok(format!("{}{}", command, COMMAND_TERMINATOR))
}

/// `sendevent` block from header lines.
///
/// The first line is the event name (`CUSTOM`, `NOTIFY`, ...); the rest are
/// `Key: value` headers.
pub fn sendevent_frame<S: AsRef<str>>(lines: &[S]) -> EslResult<String> {
    if lines.is_empty() {
        return Err(EslError::SendEventEmpty);
    }

    let mut frame = String::from("sendevent ");
    for line in lines {
        let line = line.as_ref();
        validate_line(line)?;
        frame.push_str(line);
        frame.push_str(CRLF);
    }
    frame.push_str(CRLF);
    Ok(frame)
}

/// Builder for `sendmsg` blocks.
///
/// Fields are written in insertion order; fields with an empty value are
/// skipped. The body is only written when a `content-length` field is set
/// and the body is non-empty.
///
/// ```
/// use freeswitch_esl_socket::SendMsg;
///
/// let wire = SendMsg::execute("playback", "/tmp/hello.wav", true)
///     .uuid("8b1c")
///     .to_wire_format()
///     .unwrap();
/// assert!(wire.starts_with(b"sendmsg 8b1c\n"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMsg {
    uuid: Option<String>,
    fields: IndexMap<String, String>,
    body: Bytes,
}

impl SendMsg {
    pub fn new() -> Self {
        Self::default()
    }

    /// `call-command: execute` for dialplan application `app`.
    pub fn execute(app: &str, arg: &str, event_lock: bool) -> Self {
        Self::new()
            .field(FIELD_CALL_COMMAND, "execute")
            .field(FIELD_APP_NAME, app)
            .field(FIELD_APP_ARG, arg)
            .field(FIELD_EVENT_LOCK, &event_lock.to_string())
    }

    /// Target a specific channel instead of the session's own
    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Attach a body and set `content-length` to match.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.fields
            .insert(FIELD_CONTENT_LENGTH.to_string(), body.len().to_string());
        self.body = body;
        self
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    pub fn to_wire_format(&self) -> EslResult<Vec<u8>> {
        let mut frame = String::from("sendmsg");
        if let Some(uuid) = self
            .uuid
            .as_deref()
            .filter(|u| !u.is_empty())
        {
            validate_line(uuid)?;
            frame.push(' ');
            frame.push_str(uuid);
        }
        frame.push_str(LF);

        for (key, value) in &self.fields {
            validate_line(key)?;
            if value.is_empty() {
                continue;
            }
            validate_line(value)?;
            frame.push_str(&format!("{}: {}{}", key, value, LF));
        }
        frame.push_str(LF);

        let mut wire = frame.into_bytes();
        let has_length = self
            .fields
            .get(FIELD_CONTENT_LENGTH)
            .is_some_and(|v| !v.is_empty());
        if has_length && !self
            .body
            .is_empty()
        {
            wire.extend_from_slice(&self.body);
        }
        Ok(wire)
    }
}
