//! Outbound mode tests: the test plays the switch connecting to EslServer

mod mock_server;

use freeswitch_esl_socket::{EslConnectOptions, EslServer};
use mock_server::MockClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const CHANNEL_DATA: &str = "Content-Type: command/reply\nReply-Text: +OK\nSocket-Mode: async\nControl: full\nChannel-Name: sofia/internal/1000@example.com\nCaller-Unique-ID: 4c2b\nvariable_sip_from_user: 1000\n\n";

async fn connect_switch(server: &EslServer) -> MockClient {
    let stream = TcpStream::connect(server.local_addr())
        .await
        .unwrap();
    MockClient::from_stream(stream)
}

#[tokio::test]
async fn test_outbound_session_flow() {
    let (seen_tx, mut seen_rx) = mpsc::channel(1);
    let server = EslServer::bind(
        "127.0.0.1:0",
        EslConnectOptions::default(),
        move |conn, mut messages| {
            let seen_tx = seen_tx.clone();
            async move {
                let channel_data = match messages.recv().await {
                    Some(Ok(msg)) => msg,
                    _ => return false,
                };
                let uuid = channel_data
                    .call_uuid()
                    .unwrap_or_default()
                    .to_string();
                let _ = seen_tx
                    .send((uuid, channel_data.header("variable_sip_from_user").map(str::to_string)))
                    .await;

                conn.execute_answer("", true)
                    .await
                    .is_ok()
            }
        },
    )
    .await
    .unwrap();

    let mut switch = connect_switch(&server).await;
    assert_eq!(
        switch
            .read_command()
            .await,
        "connect\r\n\r\n"
    );
    switch
        .send_raw(CHANNEL_DATA)
        .await;

    let (uuid, from_user) = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uuid, "4c2b");
    assert_eq!(from_user.as_deref(), Some("1000"));

    assert_eq!(
        switch
            .read_command()
            .await,
        "sendmsg\ncall-command: execute\nexecute-app-name: answer\nevent-lock: true\n\n"
    );
    assert_eq!(
        switch
            .read_command()
            .await,
        "exit\r\n\r\n"
    );
    assert!(switch
        .read_to_end()
        .await
        .is_empty());

    server
        .stop()
        .await;
}

#[tokio::test]
async fn test_sessions_run_concurrently() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let server = EslServer::bind("127.0.0.1:0", EslConnectOptions::default(), {
        let active = active.clone();
        let peak = peak.clone();
        move |_conn, mut messages| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Hold the session until the switch hangs up.
                while let Some(Ok(_)) = messages.recv().await {}
                active.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    })
    .await
    .unwrap();

    let mut first = connect_switch(&server).await;
    let mut second = connect_switch(&server).await;
    assert_eq!(
        first
            .read_command()
            .await,
        "connect\r\n\r\n"
    );
    assert_eq!(
        second
            .read_command()
            .await,
        "connect\r\n\r\n"
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while peak.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both handlers should run at once");

    first
        .drop_connection()
        .await;
    second
        .drop_connection()
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while active.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handlers should finish after hangup");

    server
        .stop()
        .await;
}

#[tokio::test]
async fn test_stop_leaves_running_sessions() {
    let server = EslServer::bind(
        "127.0.0.1:0",
        EslConnectOptions::default(),
        |conn, mut messages| async move {
            if let Some(Ok(_)) = messages.recv().await {
                let _ = conn.api("status").await;
            }
            false
        },
    )
    .await
    .unwrap();
    let addr = server.local_addr();

    let mut switch = connect_switch(&server).await;
    assert_eq!(
        switch
            .read_command()
            .await,
        "connect\r\n\r\n"
    );

    server
        .stop()
        .await;
    assert!(TcpStream::connect(addr)
        .await
        .is_err());

    switch
        .send_raw(CHANNEL_DATA)
        .await;
    assert_eq!(
        switch
            .read_command()
            .await,
        "api status\r\n\r\n"
    );
}
