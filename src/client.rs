//! Inbound mode: dial the switch and authenticate
//!
//! ```rust,no_run
//! use freeswitch_esl_socket::{client, EslConnectOptions};
//!
//! # async fn example() -> Result<(), freeswitch_esl_socket::EslError> {
//! let (conn, mut messages) =
//!     client::connect("127.0.0.1:8021", "ClueCon", EslConnectOptions::default()).await?;
//! conn.api("status").await?;
//! if let Some(Ok(reply)) = messages.recv().await {
//!     println!("{}", reply.body_str().unwrap_or(""));
//! }
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    command::EslCommand,
    connection::{EslConnectOptions, EslConnection, EslMessageStream},
    constants::*,
    error::{EslError, EslResult},
    headers::HeaderBlock,
    protocol::FrameReader,
};

/// Client settings as loaded from configuration
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_addr")]
    pub freeswitch_addr: String,
    pub freeswitch_password: String,
    #[serde(flatten)]
    pub options: EslConnectOptions,
}

fn default_addr() -> String {
    format!("127.0.0.1:{}", DEFAULT_ESL_PORT)
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("freeswitch_addr", &self.freeswitch_addr)
            .field("freeswitch_password", &"[REDACTED]")
            .field("options", &self.options)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            freeswitch_addr: addr.into(),
            freeswitch_password: password.into(),
            options: EslConnectOptions::default(),
        }
    }

    pub async fn connect(&self) -> EslResult<(EslConnection, EslMessageStream)> {
        connect(
            &self.freeswitch_addr,
            &self.freeswitch_password,
            self.options
                .clone(),
        )
        .await
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(addr: &str, timeout_ms: u64) -> EslResult<TcpStream> {
    debug!("[CONNECT] Starting TCP connect with {}ms timeout", timeout_ms);
    match timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(EslError::Timeout { timeout_ms })
        }
    }
}

async fn read_handshake_block<S>(frames: &mut FrameReader<S>) -> EslResult<HeaderBlock>
where
    S: AsyncRead + Unpin,
{
    frames
        .read_header_block()
        .await?
        .ok_or_else(|| {
            EslError::ReadHeaders(std::io::Error::from(std::io::ErrorKind::TimedOut))
        })
}

/// Run the auth handshake on a freshly dialed stream.
///
/// Expects an `auth/request` block, answers with `auth <password>` and
/// requires `Reply-Text: +OK accepted`. Nothing is written if the first
/// block is not an auth request. Bytes received past the reply stay in
/// `frames`.
pub async fn authenticate<S>(frames: &mut FrameReader<S>, password: &str) -> EslResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("[AUTH] Waiting for auth request from FreeSWITCH");
    let request = read_handshake_block(frames).await?;
    let content_type = request
        .get(HEADER_CONTENT_TYPE)
        .unwrap_or("");
    if content_type != CONTENT_TYPE_AUTH_REQUEST {
        warn!("[AUTH] Unexpected first block: {:?}", content_type);
        return Err(EslError::UnexpectedAuthHeader {
            content_type: content_type.to_string(),
        });
    }

    let command = EslCommand::Auth {
        password: password.to_string(),
    };
    let frame = command.to_wire_format()?;
    debug!("[AUTH] Sending command: {}", command);
    let stream = frames.get_mut();
    stream
        .write_all(frame.as_bytes())
        .await?;
    stream
        .flush()
        .await?;

    let reply = read_handshake_block(frames).await?;
    let reply_text = reply
        .get(HEADER_REPLY_TEXT)
        .unwrap_or("");
    if reply_text != AUTH_ACCEPTED {
        warn!("[AUTH] Authentication rejected: {}", reply_text);
        return Err(EslError::AuthRejected {
            reply_text: reply_text.to_string(),
        });
    }

    debug!("[AUTH] Authentication successful");
    Ok(())
}

/// Dial `addr`, authenticate, and start the decode loop.
///
/// On any handshake failure the socket is closed before returning.
pub async fn connect(
    addr: &str,
    password: &str,
    options: EslConnectOptions,
) -> EslResult<(EslConnection, EslMessageStream)> {
    info!("Connecting to FreeSWITCH at {}", addr);

    let stream = tcp_connect_with_timeout(addr, options.dial_timeout_ms).await?;
    let mut frames = FrameReader::new(stream);

    let handshake_ms = options.handshake_timeout_ms;
    let failure = match timeout(
        Duration::from_millis(handshake_ms),
        authenticate(&mut frames, password),
    )
    .await
    {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => {
            warn!("[AUTH] Handshake timed out after {}ms", handshake_ms);
            Some(EslError::Timeout {
                timeout_ms: handshake_ms,
            })
        }
    };

    if let Some(e) = failure {
        let (mut stream, _) = frames.into_parts();
        if let Err(close_err) = stream
            .shutdown()
            .await
        {
            debug!("[CONNECT] Error closing socket: {}", close_err);
        }
        return Err(e);
    }

    let (stream, buffer) = frames.into_parts();
    let (conn, messages) = EslConnection::with_buffer(stream, buffer, &options);
    conn.start()?;

    info!(
        "Successfully connected and authenticated to FreeSWITCH (connection {})",
        conn.id()
    );
    Ok((conn, messages))
}
