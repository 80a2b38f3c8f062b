//! FreeSWITCH Event Socket (ESL) protocol engine
//!
//! This crate speaks the text-framed Event Socket protocol in both
//! directions: as an inbound client that dials the switch and
//! authenticates, and as an outbound server the switch connects to for
//! each call.
//!
//! # Architecture
//!
//! Every session is split in two:
//! - [`EslConnection`] (Clone + Send): send commands from any task; each
//!   command or block is written atomically
//! - [`EslMessageStream`]: receive replies, API responses and events from
//!   the background decode loop, in arrival order
//!
//! Replies are not matched to the commands that caused them; the caller
//! reads them from the stream like any other message.
//!
//! # Examples
//!
//! ## Inbound Connection
//!
//! ```rust,no_run
//! use freeswitch_esl_socket::{client, EslConnectOptions, EslError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let (conn, mut messages) =
//!         client::connect("localhost:8021", "ClueCon", EslConnectOptions::default()).await?;
//!
//!     conn.send("event plain CHANNEL_ANSWER CHANNEL_HANGUP").await?;
//!     while let Some(item) = messages.recv().await {
//!         let msg = item?;
//!         println!("{:?}: {:?}", msg.content_type(), msg.event_name());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Outbound Server
//!
//! ```rust,no_run
//! use freeswitch_esl_socket::{EslConnectOptions, EslServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = EslServer::bind("0.0.0.0:8084", EslConnectOptions::default(), |conn, _messages| async move {
//!         let _ = conn.execute("playback", "ivr/ivr-welcome.wav", true).await;
//!         true
//!     })
//!     .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod headers;
pub mod protocol;
pub mod server;

pub(crate) mod buffer;
pub(crate) mod constants;
pub(crate) mod id;

pub use client::ClientConfig;
pub use command::{EslCommand, SendMsg};
pub use connection::{EslConnectOptions, EslConnection, EslMessageStream};
pub use constants::DEFAULT_ESL_PORT;
pub use error::{EslError, EslResult};
pub use headers::capitalize;
pub use protocol::{ContentType, EslMessage, ReplyStatus};
pub use server::EslServer;
