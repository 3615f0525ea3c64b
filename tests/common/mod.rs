//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use upgrade_gateway::config::GatewayConfig;
use upgrade_gateway::net::Listener;
use upgrade_gateway::{GatewayServer, Shutdown};

/// Start the gateway on an ephemeral port in front of `api_server`.
pub async fn start_gateway(api_server: &str, username: &str, password: &str) -> (SocketAddr, Shutdown) {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.drain_timeout_secs = 1;
    config.upstream.api_server = api_server.into();
    config.upstream.username = username.into();
    config.upstream.password = password.into();
    config.timeouts.connect_secs = 2;
    config.timeouts.upstream_secs = 5;

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(Arc::new(config));
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Read from `stream` byte by byte up to and including the blank line.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Upstream that answers every request head with `response`, then echoes raw bytes.
///
/// Each request head received is sent on the returned channel.
pub async fn start_raw_backend(response: &'static str, echo: bool) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (heads_tx, heads_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let heads_tx = heads_tx.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let _ = heads_tx.send(head);
                        let _ = socket.write_all(response.as_bytes()).await;
                        if echo {
                            let (mut read, mut write) = socket.split();
                            let _ = tokio::io::copy(&mut read, &mut write).await;
                        }
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, heads_rx)
}

/// Upstream that completes WebSocket handshakes and echoes every message.
pub async fn start_websocket_backend() -> SocketAddr {
    use futures_util::{SinkExt, StreamExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
