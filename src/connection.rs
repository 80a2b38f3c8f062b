//! Connection engine
//!
//! An ESL session is split in two halves:
//!
//! - [`EslConnection`] (Clone + Send) owns the write side. Every outbound
//!   unit (a command, a `sendmsg` block, a `sendevent` block) is written and
//!   flushed under one lock acquisition, so concurrent callers never
//!   interleave bytes.
//! - [`EslMessageStream`] receives what the background decode loop reads:
//!   decoded messages in arrival order, and at most one terminal error.
//!
//! Both queues hold a single item, so a consumer that stops receiving stops
//! the decode loop from reading further.

use serde::Deserialize;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::{
    buffer::EslBuffer,
    command::{command_frame, sendevent_frame, EslCommand, SendMsg},
    constants::*,
    error::{EslError, EslResult},
    id::generate_connection_id,
    protocol::{Decoded, EslMessage, FrameReader},
};

/// Options for ESL connection configuration.
///
/// Use [`Default::default()`] for standard settings. Missing fields take
/// their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EslConnectOptions {
    /// TCP dial deadline for inbound connections. Default: 2000.
    pub dial_timeout_ms: u64,
    /// Deadline for the whole auth handshake. Default: 2000.
    pub handshake_timeout_ms: u64,
    /// Per-read deadline in the decode loop. Expiry is retried, never
    /// fatal. Default: none.
    pub read_timeout_ms: Option<u64>,
    /// TCP keep-alive idle time and probe interval; `None` disables.
    /// Default: 3000.
    pub keepalive_ms: Option<u64>,
}

impl Default for EslConnectOptions {
    fn default() -> Self {
        Self {
            dial_timeout_ms: DEFAULT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            read_timeout_ms: None,
            keepalive_ms: Some(DEFAULT_KEEPALIVE_MS),
        }
    }
}

impl EslConnectOptions {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms
            .map(Duration::from_millis)
    }
}

/// Reader half and queue senders, held until the decode loop is started
struct DecodeLoop {
    frames: FrameReader<OwnedReadHalf>,
    message_tx: mpsc::Sender<EslMessage>,
    error_tx: mpsc::Sender<EslError>,
    /// Created with the connection, so a close that lands before the loop
    /// task first runs is still observed.
    shutdown: watch::Receiver<bool>,
}

/// State shared between connection handles and the decode loop
struct Shared {
    id: String,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
    pending: std::sync::Mutex<Option<DecodeLoop>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// ESL connection handle (Clone + Send)
#[derive(Clone)]
pub struct EslConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EslConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslConnection")
            .field("id", &self.shared.id)
            .field("peer_addr", &self.shared.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a connection (!Clone)
pub struct EslMessageStream {
    messages: mpsc::Receiver<EslMessage>,
    errors: mpsc::Receiver<EslError>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for EslMessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslMessageStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn enable_keepalive(stream: &TcpStream, interval: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(interval)
        .with_interval(interval);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

impl EslConnection {
    /// Wrap a connected socket. The decode loop is not running until
    /// [`EslConnection::start`] is called.
    pub fn from_stream(
        stream: TcpStream,
        options: &EslConnectOptions,
    ) -> (Self, EslMessageStream) {
        Self::with_buffer(stream, EslBuffer::new(), options)
    }

    /// Wrap a socket whose first bytes were already read into `buffer`
    pub(crate) fn with_buffer(
        stream: TcpStream,
        buffer: EslBuffer,
        options: &EslConnectOptions,
    ) -> (Self, EslMessageStream) {
        let id = generate_connection_id();
        let peer_addr = stream
            .peer_addr()
            .ok();

        if let Some(ms) = options.keepalive_ms {
            if let Err(e) = enable_keepalive(&stream, Duration::from_millis(ms)) {
                warn!("[{}] Could not enable TCP keep-alive: {}", id, e);
            }
        }

        let (read_half, write_half) = stream.into_split();
        let (message_tx, messages) = mpsc::channel(1);
        let (error_tx, errors) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let decode = DecodeLoop {
            frames: FrameReader::with_buffer(read_half, buffer)
                .with_read_timeout(options.read_timeout()),
            message_tx,
            error_tx,
            shutdown: shutdown_rx.clone(),
        };

        debug!("[{}] Connection created for peer {:?}", id, peer_addr);
        let shared = Arc::new(Shared {
            id,
            peer_addr,
            writer: Mutex::new(Some(write_half)),
            shutdown,
            pending: std::sync::Mutex::new(Some(decode)),
            task: std::sync::Mutex::new(None),
        });

        let stream = EslMessageStream {
            messages,
            errors,
            shutdown: shutdown_rx,
        };

        (Self { shared }, stream)
    }

    /// Start the background decode loop. A connection runs one decode loop
    /// for its whole life; a second call fails.
    pub fn start(&self) -> EslResult<()> {
        let decode = lock(&self.shared.pending)
            .take()
            .ok_or_else(|| EslError::DecodeLoopStarted {
                id: self
                    .shared
                    .id
                    .clone(),
            })?;

        let task = tokio::spawn(decode_loop(decode, self.shared.clone()));
        *lock(&self.shared.task) = Some(task);
        Ok(())
    }

    /// Unique id of this connection (UUIDv7, or a counter value if the
    /// random source failed)
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Address of the switch on the other end
    pub fn originator_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        *self
            .shared
            .shutdown
            .borrow()
    }

    /// Send one command line followed by the empty-body terminator.
    pub async fn send(&self, command: &str) -> EslResult<()> {
        let frame = command_frame(command)?;
        if command.starts_with("auth ") {
            debug!("[{}] Sending command: auth [REDACTED]", self.shared.id);
        } else {
            debug!("[{}] Sending command: {}", self.shared.id, command);
        }
        self.write_unit(frame.as_bytes())
            .await
    }

    /// Send commands in order, stopping at the first failure.
    pub async fn send_many<S: AsRef<str>>(&self, commands: &[S]) -> EslResult<()> {
        for command in commands {
            self.send(command.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Send a typed command
    pub async fn send_command(&self, command: &EslCommand) -> EslResult<()> {
        let frame = command.to_wire_format()?;
        debug!("[{}] Sending command: {}", self.shared.id, command);
        self.write_unit(frame.as_bytes())
            .await
    }

    /// Fire an event into the switch's event bus.
    ///
    /// `lines[0]` is the event name, the rest are `Key: value` headers.
    pub async fn send_event<S: AsRef<str>>(&self, lines: &[S]) -> EslResult<()> {
        let frame = sendevent_frame(lines)?;
        trace!("[{}] Sending event block: {:?}", self.shared.id, frame);
        self.write_unit(frame.as_bytes())
            .await
    }

    /// Send a `sendmsg` block.
    pub async fn send_msg(&self, msg: &SendMsg) -> EslResult<()> {
        let frame = msg.to_wire_format()?;
        trace!("[{}] Sending message block: {:?}", self.shared.id, msg);
        self.write_unit(&frame)
            .await
    }

    /// `api <command>`; the result arrives as an `api/response` message.
    pub async fn api(&self, command: &str) -> EslResult<()> {
        self.send_command(&EslCommand::Api {
            command: command.to_string(),
        })
        .await
    }

    /// `bgapi <command>`; the reply carries a `Job-UUID`, the result arrives
    /// later as a `BACKGROUND_JOB` event.
    pub async fn bgapi(&self, command: &str) -> EslResult<()> {
        self.send_command(&EslCommand::BgApi {
            command: command.to_string(),
        })
        .await
    }

    /// Execute a dialplan application on the session's own channel.
    pub async fn execute(&self, app: &str, arg: &str, event_lock: bool) -> EslResult<()> {
        self.send_msg(&SendMsg::execute(app, arg, event_lock))
            .await
    }

    /// Execute a dialplan application on channel `uuid`.
    pub async fn execute_uuid(
        &self,
        uuid: &str,
        app: &str,
        arg: &str,
        event_lock: bool,
    ) -> EslResult<()> {
        self.send_msg(&SendMsg::execute(app, arg, event_lock).uuid(uuid))
            .await
    }

    /// `set key=value` on the session's channel
    pub async fn execute_set(&self, key: &str, value: &str, event_lock: bool) -> EslResult<()> {
        self.execute("set", &format!("{}={}", key, value), event_lock)
            .await
    }

    pub async fn execute_answer(&self, arg: &str, event_lock: bool) -> EslResult<()> {
        self.execute("answer", arg, event_lock)
            .await
    }

    /// Hang up channel `uuid`, or the session's own channel when `None`.
    pub async fn execute_hangup(
        &self,
        uuid: Option<&str>,
        arg: &str,
        event_lock: bool,
    ) -> EslResult<()> {
        match uuid.filter(|u| !u.is_empty()) {
            Some(uuid) => {
                self.execute_uuid(uuid, "hangup", arg, event_lock)
                    .await
            }
            None => {
                self.execute("hangup", arg, event_lock)
                    .await
            }
        }
    }

    /// Outbound mode: accept the session the switch opened
    pub async fn connect(&self) -> EslResult<()> {
        self.send_command(&EslCommand::Connect)
            .await
    }

    /// Ask the switch to end the session
    pub async fn exit(&self) -> EslResult<()> {
        self.send_command(&EslCommand::Exit)
            .await
    }

    /// Close the socket and wait for the decode loop to finish.
    ///
    /// Safe to call more than once, and after the decode loop has already
    /// ended. Once closed, the message stream yields nothing further; a loop
    /// stopped this way ends without putting an error on the error queue.
    pub async fn close(&self) -> EslResult<()> {
        if !self
            .shared
            .shutdown
            .send_replace(true)
        {
            debug!("[{}] Closing connection", self.shared.id);
        }

        // A loop that never started still owns the read half.
        drop(
            lock(&self.shared.pending)
                .take(),
        );

        let result = close_writer(&self.shared).await;

        let task = lock(&self.shared.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("[{}] Decode loop task failed: {}", self.shared.id, e);
            }
        }
        result
    }

    async fn write_unit(&self, unit: &[u8]) -> EslResult<()> {
        let mut writer = self
            .shared
            .writer
            .lock()
            .await;
        let writer = writer
            .as_mut()
            .ok_or(EslError::NotConnected)?;
        writer
            .write_all(unit)
            .await?;
        writer
            .flush()
            .await?;
        Ok(())
    }
}

async fn close_writer(shared: &Shared) -> EslResult<()> {
    let writer = shared
        .writer
        .lock()
        .await
        .take();
    if let Some(mut writer) = writer {
        match writer
            .shutdown()
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => return Err(EslError::Io(e)),
        }
    }
    Ok(())
}

async fn decode_loop(mut decode: DecodeLoop, shared: Arc<Shared>) {
    let id = shared
        .id
        .as_str();
    debug!("[{}] Decode loop started", id);

    loop {
        // Take the single delivery slot before reading, so nothing is read
        // off the socket until the consumer has the previous message.
        let permit = tokio::select! {
            biased;
            _ = decode.shutdown.changed() => break,
            permit = decode.message_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("[{}] Message stream dropped, stopping", id);
                    break;
                }
            },
        };

        let decoded = tokio::select! {
            biased;
            _ = decode.shutdown.changed() => break,
            decoded = decode.frames.decode() => decoded,
        };

        match decoded {
            Ok(Decoded::Message(message)) => {
                trace!("[{}] Delivering message: {}", id, message);
                permit.send(message);
            }
            Ok(Decoded::Idle) | Ok(Decoded::Dropped) => {}
            Err(e) => {
                drop(permit);
                match &e {
                    EslError::ReadHeaders(io)
                        if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        info!("[{}] Connection closed by peer", id)
                    }
                    _ => error!("[{}] Decode loop failed: {}", id, e),
                }
                tokio::select! {
                    biased;
                    _ = decode.shutdown.changed() => {}
                    _ = decode.error_tx.send(e) => {}
                }
                break;
            }
        }
    }

    if let Err(e) = close_writer(&shared).await {
        debug!("[{}] Error closing socket: {}", id, e);
    }
    // Queues close only after the socket is shut.
    drop(decode);
    debug!("[{}] Decode loop finished", id);
}

impl EslMessageStream {
    /// Next message or terminal error, in arrival order.
    ///
    /// Returns `None` once the decode loop has ended and everything it
    /// produced was received, or after the connection was closed.
    pub async fn recv(&mut self) -> Option<EslResult<EslMessage>> {
        if self.is_closed() {
            return None;
        }
        let item = tokio::select! {
            biased;
            Some(message) = self.messages.recv() => Ok(message),
            Some(error) = self.errors.recv() => Err(error),
            else => return None,
        };
        if self.is_closed() {
            return None;
        }
        Some(item)
    }

    /// Next message only. Fails with [`EslError::ConnectionClosed`] when no
    /// more messages can arrive; the cause, if any, is on
    /// [`EslMessageStream::recv_error`].
    pub async fn recv_message(&mut self) -> EslResult<EslMessage> {
        if self.is_closed() {
            return Err(EslError::ConnectionClosed);
        }
        self.messages
            .recv()
            .await
            .ok_or(EslError::ConnectionClosed)
    }

    /// The error that ended the decode loop, `None` if it ended without one
    pub async fn recv_error(&mut self) -> Option<EslError> {
        self.errors
            .recv()
            .await
    }

    /// Whether the connection was closed locally
    pub fn is_closed(&self) -> bool {
        *self
            .shutdown
            .borrow()
    }
}

impl futures_util::Stream for EslMessageStream {
    type Item = EslResult<EslMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_closed() {
            return Poll::Ready(None);
        }

        let mut messages_done = false;
        match self
            .messages
            .poll_recv(cx)
        {
            Poll::Ready(Some(message)) => return Poll::Ready(Some(Ok(message))),
            Poll::Ready(None) => messages_done = true,
            Poll::Pending => {}
        }

        match self
            .errors
            .poll_recv(cx)
        {
            Poll::Ready(Some(error)) => Poll::Ready(Some(Err(error))),
            Poll::Ready(None) if messages_done => Poll::Ready(None),
            _ => Poll::Pending,
        }
    }
}
