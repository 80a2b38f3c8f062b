//! Mock FreeSWITCH ESL server for integration testing

#![allow(dead_code)]

use freeswitch_esl_socket::{client, EslConnectOptions, EslConnection, EslMessageStream};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct MockEslServer {
    listener: TcpListener,
    password: String,
}

/// The switch side of one accepted connection
pub struct MockClient {
    stream: BufReader<TcpStream>,
}

impl MockEslServer {
    pub async fn start(password: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        Self {
            listener,
            password: password.to_string(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap()
    }

    /// Accept a connection without any handshake
    pub async fn accept_raw(&self) -> MockClient {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .unwrap();
        MockClient {
            stream: BufReader::new(stream),
        }
    }

    /// Accept a connection and perform the auth handshake
    pub async fn accept(&self) -> MockClient {
        let mut client = self
            .accept_raw()
            .await;

        client
            .send_raw("Content-Type: auth/request\n\n")
            .await;

        let cmd = client
            .read_command()
            .await;
        let expected = format!("auth {}\r\n\r\n", self.password);
        if cmd == expected {
            client
                .reply_ok("accepted")
                .await;
        } else {
            client
                .reply_err("invalid")
                .await;
        }

        client
    }
}

impl MockClient {
    /// Wrap the switch end of an outbound-mode session
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send_raw(&mut self, data: &str) {
        self.stream
            .get_mut()
            .write_all(data.as_bytes())
            .await
            .unwrap();
    }

    /// Send a text/event-plain event with escaped header values
    pub async fn send_event_plain(&mut self, event_name: &str, headers: &[(&str, &str)], body: &str) {
        let mut inner = format!("Event-Name: {}\n", event_name);
        for (key, value) in headers {
            inner.push_str(&format!(
                "{}: {}\n",
                key,
                percent_encode(value.as_bytes(), NON_ALPHANUMERIC)
            ));
        }
        if !body.is_empty() {
            inner.push_str(&format!("Content-Length: {}\n", body.len()));
        }
        inner.push('\n');
        inner.push_str(body);

        let envelope = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n",
            inner.len()
        );
        self.send_raw(&format!("{}{}", envelope, inner))
            .await;
    }

    /// Send a text/event-json event
    pub async fn send_event_json(&mut self, json: &str) {
        let data = format!(
            "Content-Length: {}\nContent-Type: text/event-json\n\n{}",
            json.len(),
            json
        );
        self.send_raw(&data)
            .await;
    }

    /// Send a HEARTBEAT event with realistic headers
    pub async fn send_heartbeat(&mut self) {
        self.send_event_plain(
            "HEARTBEAT",
            &[
                ("Core-UUID", "test-core-uuid"),
                ("FreeSWITCH-Hostname", "test-host"),
                ("Event-Info", "System Ready"),
                ("Up-Time", "0 years, 0 days, 1 hour, 23 minutes"),
                ("Session-Count", "5"),
            ],
            "",
        )
        .await;
    }

    /// Send a disconnect notice
    pub async fn send_disconnect_notice(&mut self, message: &str) {
        let data = format!(
            "Content-Type: text/disconnect-notice\nContent-Disposition: disconnect\nContent-Length: {}\n\n{}",
            message.len(),
            message
        );
        self.send_raw(&data)
            .await;
    }

    /// Read one command or block from the client (up to its blank line)
    pub async fn read_command(&mut self) -> String {
        let mut result = String::new();

        loop {
            let mut line = String::new();
            let n = self
                .stream
                .read_line(&mut line)
                .await
                .unwrap();
            if n == 0 {
                break;
            }
            result.push_str(&line);
            if result.ends_with("\r\n\r\n") || result.ends_with("\n\n") {
                break;
            }
        }

        result
    }

    /// Read exactly `len` bytes, for block bodies
    pub async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .unwrap();
        buf
    }

    /// Read until the client closes its side
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.stream
            .read_to_end(&mut buf)
            .await
            .unwrap();
        buf
    }

    /// Send a +OK command reply
    pub async fn reply_ok(&mut self, text: &str) {
        let msg = format!("Content-Type: command/reply\nReply-Text: +OK {}\n\n", text);
        self.send_raw(&msg)
            .await;
    }

    /// Send an api/response with body
    pub async fn reply_api(&mut self, body: &str) {
        let data = format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        );
        self.send_raw(&data)
            .await;
    }

    /// Send a -ERR command reply
    pub async fn reply_err(&mut self, text: &str) {
        let msg = format!("Content-Type: command/reply\nReply-Text: -ERR {}\n\n", text);
        self.send_raw(&msg)
            .await;
    }

    /// Drop the TCP connection
    pub async fn drop_connection(self) {
        drop(self.stream);
    }
}

/// Create a connected mock pair (MockClient, EslConnection, EslMessageStream)
pub async fn setup_connected_pair(
    password: &str,
) -> (MockClient, EslConnection, EslMessageStream) {
    setup_connected_pair_with_options(password, EslConnectOptions::default()).await
}

pub async fn setup_connected_pair_with_options(
    password: &str,
    options: EslConnectOptions,
) -> (MockClient, EslConnection, EslMessageStream) {
    let server = MockEslServer::start(password).await;
    let addr = server
        .addr()
        .to_string();

    let (mock_client, esl_result) = tokio::join!(
        server.accept(),
        client::connect(&addr, password, options)
    );

    let (conn, messages) = esl_result.unwrap();
    (mock_client, conn, messages)
}
