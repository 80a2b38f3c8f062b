//! Protocol constants and configuration values

/// Default FreeSWITCH ESL port for inbound connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Socket buffer size for reading from TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB) - used for both initial allocation and growth increments
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum single message size (8MB) - validates Content-Length header
/// No legitimate ESL message should exceed this (largest is sofia status ~1-2MB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum total buffer size (16MB) - an unterminated header block beyond this
/// means the peer is not speaking ESL.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Terminator written after a single-line command
pub const COMMAND_TERMINATOR: &str = "\r\n\r\n";
/// Line break inside `sendevent` blocks
pub const CRLF: &str = "\r\n";
/// Line break inside `sendmsg` blocks
pub const LF: &str = "\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";

/// Header names as they appear on the wire
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";

/// Header names after normalization
pub const HEADER_EVENT_NAME: &str = "Event-Name";
pub const HEADER_CALLER_UUID: &str = "Caller-Unique-Id";
pub const HEADER_JOB_UUID: &str = "Job-Uuid";
pub const JSON_BODY_KEY: &str = "_body";

/// Reply-Text accepting the `auth` command
pub const AUTH_ACCEPTED: &str = "+OK accepted";
/// Reply-Text prefix of a negative acknowledgement
pub const REPLY_ERR_PREFIX: &str = "-ERR";
pub const REPLY_OK_PREFIX: &str = "+OK";
/// First character of a Reply-Text whose headers carry escaped values
pub const ESCAPED_REPLY_MARKER: char = '%';

/// sendmsg field names
pub const FIELD_CALL_COMMAND: &str = "call-command";
pub const FIELD_APP_NAME: &str = "execute-app-name";
pub const FIELD_APP_ARG: &str = "execute-app-arg";
pub const FIELD_EVENT_LOCK: &str = "event-lock";
pub const FIELD_CONTENT_LENGTH: &str = "content-length";

/// Dial timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Auth handshake timeout in milliseconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;

/// TCP keep-alive idle time and probe interval in milliseconds
pub const DEFAULT_KEEPALIVE_MS: u64 = 3000;
