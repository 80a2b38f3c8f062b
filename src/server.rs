//! Outbound mode: accept sessions opened by the switch
//!
//! The dialplan `socket` application makes the switch connect to us, one
//! TCP session per call. Each accepted session is greeted with `connect`,
//! its decode loop is started, and the handler runs with the connection.
//! When the handler returns `true`, `exit` is sent before closing.
//!
//! ```rust,no_run
//! use freeswitch_esl_socket::{EslConnectOptions, EslServer};
//!
//! # async fn example() -> Result<(), freeswitch_esl_socket::EslError> {
//! let server = EslServer::bind("0.0.0.0:8084", EslConnectOptions::default(), |conn, mut messages| async move {
//!     if let Some(Ok(channel_data)) = messages.recv().await {
//!         println!("call {:?}", channel_data.call_uuid());
//!     }
//!     conn.execute_answer("", true).await.is_ok()
//! })
//! .await?;
//! # server.stop().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    connection::{EslConnectOptions, EslConnection, EslMessageStream},
    error::{EslError, EslResult},
};

/// Outbound ESL listener
pub struct EslServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EslServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslServer")
            .field("local_addr", &self.local_addr)
            .field("stopped", &*self.shutdown.borrow())
            .finish()
    }
}

impl EslServer {
    /// Bind `addr` and start accepting in the background.
    ///
    /// `handler` runs once per session, after the `connect` greeting, on
    /// its own task. Its return value says whether to send `exit` before
    /// the session is closed.
    pub async fn bind<A, H, F>(addr: A, options: EslConnectOptions, handler: H) -> EslResult<Self>
    where
        A: ToSocketAddrs,
        H: Fn(EslConnection, EslMessageStream) -> F + Send + Sync + 'static,
        F: Future<Output = bool> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| {
                error!("Could not start listener: {}", e);
                EslError::Io(e)
            })?;
        let local_addr = listener.local_addr()?;
        info!("Starting FreeSWITCH outbound server @ {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(handler),
            Arc::new(options),
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close the listening socket. Sessions already
    /// accepted keep running.
    pub async fn stop(&self) {
        debug!("Stopping outbound server ...");
        self.shutdown
            .send_replace(true);
        let task = self
            .task
            .lock()
            .await
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Accept loop task failed: {}", e);
            }
        }
    }
}

async fn accept_loop<H, F>(
    listener: TcpListener,
    handler: Arc<H>,
    options: Arc<EslConnectOptions>,
    mut shutdown: watch::Receiver<bool>,
) where
    H: Fn(EslConnection, EslMessageStream) -> F + Send + Sync + 'static,
    F: Future<Output = bool> + Send + 'static,
{
    loop {
        debug!("Waiting for incoming connections ...");
        let accepted = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(process(stream, peer, handler.clone(), options.clone()));
            }
            Err(e) => {
                if !*shutdown.borrow() {
                    error!("Error accepting connection: {}", e);
                }
                break;
            }
        }
    }
    debug!("Outbound server on {:?} stopped", listener.local_addr().ok());
}

async fn process<H, F>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    options: Arc<EslConnectOptions>,
) where
    H: Fn(EslConnection, EslMessageStream) -> F + Send + Sync + 'static,
    F: Future<Output = bool> + Send + 'static,
{
    debug!("Got new connection from: {}", peer);
    let (conn, messages) = EslConnection::from_stream(stream, &options);

    if let Err(e) = conn
        .connect()
        .await
    {
        error!("[{}] Error while accepting connection: {}", conn.id(), e);
        close(&conn).await;
        return;
    }

    if let Err(e) = conn.start() {
        error!("[{}] {}", conn.id(), e);
        close(&conn).await;
        return;
    }

    let should_exit = handler(conn.clone(), messages).await;
    if should_exit {
        if let Err(e) = conn
            .exit()
            .await
        {
            debug!("[{}] Could not send exit: {}", conn.id(), e);
        }
    }
    close(&conn).await;
}

async fn close(conn: &EslConnection) {
    if let Err(e) = conn
        .close()
        .await
    {
        debug!("[{}] Error closing connection: {}", conn.id(), e);
    }
}
