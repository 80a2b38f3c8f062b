//! Example outbound ESL server
//!
//! Point a dialplan extension at it:
//! `<action application="socket" data="127.0.0.1:8040 async full"/>`
//!
//! Each call is answered, hears a prompt, and is hung up.
//!
//! Usage: cargo run --example outbound_server

use freeswitch_esl_socket::{EslConnectOptions, EslConnection, EslMessageStream, EslResult, EslServer};
use tracing::{info, warn};

async fn handle_call(conn: EslConnection, mut messages: EslMessageStream) -> EslResult<()> {
    // The reply to `connect` carries the channel data.
    let channel_data = match messages.recv().await {
        Some(item) => item?,
        None => return Ok(()),
    };
    info!(
        "Call {} from {}",
        channel_data.call_uuid().unwrap_or("?"),
        channel_data
            .header("Caller-Caller-ID-Number")
            .unwrap_or("unknown")
    );

    conn.send("myevents")
        .await?;
    conn.execute_answer("", true)
        .await?;
    conn.execute_set("playback_terminators", "none", true)
        .await?;
    conn.execute("playback", "ivr/ivr-welcome_to_freeswitch.wav", true)
        .await?;
    conn.execute_hangup(None, "NORMAL_CLEARING", false)
        .await?;

    while let Some(item) = messages.recv().await {
        let msg = item?;
        if msg.event_name() == Some("CHANNEL_HANGUP_COMPLETE") {
            info!("Call {} ended", msg.call_uuid().unwrap_or("?"));
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bind_addr = "0.0.0.0:8040";
    let server = EslServer::bind(bind_addr, EslConnectOptions::default(), |conn, messages| async move {
        if let Err(e) = handle_call(conn, messages).await {
            warn!("Call handling failed: {}", e);
        }
        true
    })
    .await?;
    info!("Outbound ESL server listening on {}", server.local_addr());

    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    server
        .stop()
        .await;
    Ok(())
}
