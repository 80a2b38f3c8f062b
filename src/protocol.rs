//! ESL frame decoding and message types
//!
//! A frame is a header block terminated by a blank line, optionally followed
//! by exactly `Content-Length` body bytes. [`FrameReader`] turns a byte
//! stream into [`EslMessage`]s, dispatching on `Content-Type`:
//!
//! | Content-Type             | headers                          | body                 |
//! |--------------------------|----------------------------------|----------------------|
//! | `command/reply`          | frame headers, unescaped if `Reply-Text` starts with `%` | frame body |
//! | `api/response`           | frame headers                    | frame body           |
//! | `text/event-plain`       | nested header block, unescaped   | nested body          |
//! | `text/event-json`        | JSON string and integer members  | `_body` member       |
//! | `text/disconnect-notice` | frame headers                    | frame body           |
//!
//! Frames with any other content type are read and discarded.

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{
    buffer::EslBuffer,
    constants::*,
    error::{EslError, EslResult},
    headers::{capitalize, HeaderBlock},
};

/// Frame content types the decoder delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    CommandReply,
    ApiResponse,
    EventPlain,
    EventJson,
    DisconnectNotice,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::CommandReply => CONTENT_TYPE_COMMAND_REPLY,
            ContentType::ApiResponse => CONTENT_TYPE_API_RESPONSE,
            ContentType::EventPlain => CONTENT_TYPE_TEXT_EVENT_PLAIN,
            ContentType::EventJson => CONTENT_TYPE_TEXT_EVENT_JSON,
            ContentType::DisconnectNotice => CONTENT_TYPE_DISCONNECT_NOTICE,
        }
    }
}

impl FromStr for ContentType {
    type Err = EslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CONTENT_TYPE_COMMAND_REPLY => Ok(ContentType::CommandReply),
            CONTENT_TYPE_API_RESPONSE => Ok(ContentType::ApiResponse),
            CONTENT_TYPE_TEXT_EVENT_PLAIN => Ok(ContentType::EventPlain),
            CONTENT_TYPE_TEXT_EVENT_JSON => Ok(ContentType::EventJson),
            CONTENT_TYPE_DISCONNECT_NOTICE => Ok(ContentType::DisconnectNotice),
            other => Err(EslError::UnsupportedContentType {
                content_type: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome encoded in a command reply's `Reply-Text`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// `+OK ...`
    Ok,
    /// `-ERR ...`
    Err,
    /// Anything else, including no `Reply-Text` at all
    Other,
}

/// One decoded frame: normalized headers plus raw body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EslMessage {
    headers: IndexMap<String, String>,
    body: Bytes,
}

impl EslMessage {
    pub fn new(headers: IndexMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Header value by name. The name may use any casing; it is looked up
    /// as given and then in normalized form.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .get(&capitalize(name))
            })
            .map(String::as_str)
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, `None` if it is not valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn into_parts(self) -> (IndexMap<String, String>, Bytes) {
        (self.headers, self.body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    /// Classify `Reply-Text`.
    ///
    /// The decoder delivers negative acknowledgements as ordinary messages;
    /// this is how callers tell them apart.
    pub fn reply_status(&self) -> ReplyStatus {
        match self.reply_text() {
            Some(text) if text.starts_with(REPLY_OK_PREFIX) => ReplyStatus::Ok,
            Some(text) if text.starts_with(REPLY_ERR_PREFIX) => ReplyStatus::Err,
            _ => ReplyStatus::Other,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.header(HEADER_EVENT_NAME)
    }

    /// `Caller-Unique-Id` of the call this message belongs to
    pub fn call_uuid(&self) -> Option<&str> {
        self.header(HEADER_CALLER_UUID)
    }

    /// `Job-Uuid` of a `bgapi` reply or `BACKGROUND_JOB` event
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(HEADER_JOB_UUID)
    }

    /// Sorted `key: value` lines followed by the body, for diagnostics
    pub fn dump(&self) -> String {
        let mut keys: Vec<&String> = self
            .headers
            .keys()
            .collect();
        keys.sort();

        let mut out = String::new();
        for key in keys {
            out.push_str(&format!("{}: {}\r\n", key, self.headers[key]));
        }
        out.push_str(&format!("BODY: {}\r\n", String::from_utf8_lossy(&self.body)));
        out
    }
}

impl fmt::Display for EslMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} body={}",
            self.headers,
            String::from_utf8_lossy(&self.body)
        )
    }
}

/// Result of one decode-loop iteration
#[derive(Debug)]
pub enum Decoded {
    /// A complete message for the consumer
    Message(EslMessage),
    /// The read deadline expired before a header block started; nothing lost
    Idle,
    /// A frame was consumed but not delivered (unsupported content type, or
    /// the body read timed out)
    Dropped,
}

/// Header block and body of one frame, before content-type dispatch
enum RawFrame {
    Complete { headers: HeaderBlock, body: Bytes },
    Idle,
    Dropped,
}

enum Fill {
    Data,
    TimedOut,
}

/// Frame decoder over any byte source.
///
/// Owns the read buffer; bytes past the current frame stay buffered for the
/// next call, so a reader can be handed from the auth handshake to the
/// decode loop with [`FrameReader::into_parts`] without losing data.
pub struct FrameReader<R> {
    reader: R,
    buffer: EslBuffer,
    read_timeout: Option<Duration>,
    read_buf: Box<[u8]>,
}

impl FrameReader<tokio::io::Empty> {
    /// Decoder over a complete in-memory region, used for nested frames.
    /// Running out of bytes is an unexpected EOF.
    pub fn over_bytes(data: &[u8]) -> Self {
        Self {
            reader: tokio::io::empty(),
            buffer: EslBuffer::from_bytes(data),
            read_timeout: None,
            read_buf: Box::new([]),
        }
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, EslBuffer::new())
    }

    /// Resume decoding with bytes already buffered by a previous reader
    pub fn with_buffer(reader: R, buffer: EslBuffer) -> Self {
        Self {
            reader,
            buffer,
            read_timeout: None,
            read_buf: vec![0u8; SOCKET_BUF_SIZE].into_boxed_slice(),
        }
    }

    /// Per-read deadline. Expiry is reported as [`Decoded::Idle`] or
    /// [`Decoded::Dropped`], never as an error.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_parts(self) -> (R, EslBuffer) {
        (self.reader, self.buffer)
    }

    /// Read and decode one frame.
    pub async fn decode(&mut self) -> EslResult<Decoded> {
        let (headers, body) = match self
            .read_frame()
            .await?
        {
            RawFrame::Complete { headers, body } => (headers, body),
            RawFrame::Idle => return Ok(Decoded::Idle),
            RawFrame::Dropped => return Ok(Decoded::Dropped),
        };

        let content_type = match headers
            .get(HEADER_CONTENT_TYPE)
            .unwrap_or("")
            .parse::<ContentType>()
        {
            Ok(content_type) => content_type,
            Err(e) => {
                warn!("{}, dropping frame", e);
                return Ok(Decoded::Dropped);
            }
        };

        trace!("[DECODE] {} frame, {} body bytes", content_type, body.len());
        let message = decode_message(content_type, headers, body).await?;
        Ok(Decoded::Message(message))
    }

    /// Read the next header block.
    pub async fn read_header_block(&mut self) -> EslResult<Option<HeaderBlock>> {
        loop {
            if let Some(raw) = self
                .buffer
                .take_header_block()
            {
                // Header values are not always UTF-8 (Latin-1 caller names).
                let text = String::from_utf8_lossy(&raw);
                let block = HeaderBlock::parse(&text).map_err(EslError::ReadHeaders)?;
                return Ok(Some(block));
            }

            self.buffer
                .check_size_limits()
                .map_err(EslError::ReadHeaders)?;

            match self
                .fill()
                .await
                .map_err(EslError::ReadHeaders)?
            {
                Fill::Data => {}
                Fill::TimedOut => return Ok(None),
            }
        }
    }

    async fn read_body(&mut self, len: usize) -> EslResult<Option<Bytes>> {
        loop {
            if let Some(body) = self
                .buffer
                .extract_bytes(len)
            {
                return Ok(Some(body));
            }

            match self
                .fill()
                .await
                .map_err(EslError::ReadBody)?
            {
                Fill::Data => {}
                Fill::TimedOut => {
                    // The partial body is not kept for the next read: the
                    // frame is lost and decoding restarts on the bytes that
                    // follow.
                    let dropped = self
                        .buffer
                        .discard(len);
                    warn!(
                        "Timed out reading body: dropping frame after {} of {} bytes",
                        dropped, len
                    );
                    return Ok(None);
                }
            }
        }
    }

    async fn read_frame(&mut self) -> EslResult<RawFrame> {
        let headers = match self
            .read_header_block()
            .await?
        {
            Some(headers) => headers,
            None => return Ok(RawFrame::Idle),
        };

        let body = match headers.get(HEADER_CONTENT_LENGTH) {
            Some(raw) => {
                let len = parse_content_length(raw)?;
                match self
                    .read_body(len)
                    .await?
                {
                    Some(body) => body,
                    None => return Ok(RawFrame::Dropped),
                }
            }
            None => Bytes::new(),
        };

        Ok(RawFrame::Complete { headers, body })
    }

    async fn fill(&mut self) -> io::Result<Fill> {
        let read = self
            .reader
            .read(&mut self.read_buf);
        let result = match self.read_timeout {
            Some(limit) => match timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => return Ok(Fill::TimedOut),
            },
            None => read.await,
        };

        match result {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => {
                self.buffer
                    .extend_from_slice(&self.read_buf[..n]);
                Ok(Fill::Data)
            }
            Err(e) if is_timeout(&e) => Ok(Fill::TimedOut),
            Err(e) => Err(e),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn parse_content_length(raw: &str) -> EslResult<usize> {
    let len: usize = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| EslError::InvalidContentLength {
            value: raw.to_string(),
            reason: e.to_string(),
        })?;

    if len > MAX_MESSAGE_SIZE {
        return Err(EslError::InvalidContentLength {
            value: raw.to_string(),
            reason: format!("exceeds limit {}", MAX_MESSAGE_SIZE),
        });
    }
    Ok(len)
}

async fn decode_message(
    content_type: ContentType,
    headers: HeaderBlock,
    body: Bytes,
) -> EslResult<EslMessage> {
    match content_type {
        ContentType::CommandReply => {
            let reply = headers
                .get(HEADER_REPLY_TEXT)
                .unwrap_or("");
            if reply.starts_with(REPLY_ERR_PREFIX) {
                debug!("Command reply is a negative acknowledgement: {}", reply);
            }
            let unescape = reply.starts_with(ESCAPED_REPLY_MARKER);
            Ok(EslMessage::new(headers.normalized(unescape), body))
        }
        ContentType::ApiResponse | ContentType::DisconnectNotice => {
            Ok(EslMessage::new(headers.normalized(false), body))
        }
        ContentType::EventPlain => decode_plain_event(&body).await,
        ContentType::EventJson => decode_json_event(&body),
    }
}

/// The body of a plain event is itself a frame: a header block with escaped
/// values and an optional `Content-Length` body of its own.
async fn decode_plain_event(body: &[u8]) -> EslResult<EslMessage> {
    let mut nested = FrameReader::over_bytes(body);
    match nested
        .read_frame()
        .await?
    {
        RawFrame::Complete { headers, body } => Ok(EslMessage::new(headers.normalized(true), body)),
        RawFrame::Idle | RawFrame::Dropped => Err(EslError::ReadHeaders(io::Error::from(
            io::ErrorKind::UnexpectedEof,
        ))),
    }
}

fn decode_json_event(body: &[u8]) -> EslResult<EslMessage> {
    let decoded: serde_json::Map<String, Value> = serde_json::from_slice(body)?;

    let mut headers = IndexMap::with_capacity(decoded.len());
    for (key, value) in decoded {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
            other => {
                warn!("Removed non-string property ({}): {}", key, other);
                continue;
            }
        };
        headers.insert(capitalize(&key), value);
    }

    let body = headers
        .shift_remove(JSON_BODY_KEY)
        .map(Bytes::from)
        .unwrap_or_default();
    Ok(EslMessage::new(headers, body))
}
