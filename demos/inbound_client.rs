//! Example inbound ESL client
//!
//! Connects to FreeSWITCH, runs a few API commands and prints events for a
//! short while.
//!
//! Usage: cargo run --example inbound_client [-- config.json]
//!
//! The optional config file holds a `ClientConfig`:
//! `{"freeswitch_addr": "127.0.0.1:8021", "freeswitch_password": "ClueCon"}`

use freeswitch_esl_socket::{ClientConfig, EslError, ReplyStatus};
use std::time::Duration;
use tracing::{error, info, warn};

fn load_config() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(ClientConfig::new("127.0.0.1:8021", "ClueCon")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let (conn, mut messages) = match config.connect().await {
        Ok(pair) => {
            info!("Successfully connected to FreeSWITCH");
            pair
        }
        Err(EslError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            error!(
                "Failed to connect to FreeSWITCH - is it running on {}?",
                config.freeswitch_addr
            );
            return Err(e.into());
        }
        Err(e) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
    };

    // Replies are not matched to commands: each one is simply the next
    // message on the stream.
    conn.send_many(&["event plain HEARTBEAT CHANNEL_CREATE CHANNEL_HANGUP BACKGROUND_JOB"])
        .await?;
    conn.api("status")
        .await?;
    conn.bgapi("version")
        .await?;

    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            item = messages.recv() => match item {
                Some(Ok(msg)) => match msg.content_type() {
                    Some("api/response") => println!("{}", msg.body_str().unwrap_or_default()),
                    Some("command/reply") if msg.reply_status() == ReplyStatus::Err => {
                        warn!("Command failed: {}", msg.reply_text().unwrap_or_default())
                    }
                    Some("command/reply") => info!("Reply: {}", msg.reply_text().unwrap_or_default()),
                    _ => info!(
                        "Event {} (job {:?}, call {:?})",
                        msg.event_name().unwrap_or("?"),
                        msg.job_uuid(),
                        msg.call_uuid()
                    ),
                },
                Some(Err(e)) => {
                    error!("Connection failed: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    conn.close()
        .await?;
    info!("Disconnected");
    Ok(())
}
