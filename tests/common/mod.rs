//! Shared harness: an in-process relay server, a scriptable upstream and a
//! websocket client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_hdr_async};

use waav_relay::{ServerConfig, routes, state::AppState};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type UpstreamSocket = WebSocketStream<TcpStream>;

/// One accepted upstream handshake.
pub struct UpstreamConnection {
    pub socket: UpstreamSocket,
    pub uri: String,
    pub headers: HeaderMap,
}

/// Mock upstream realtime service accepting any number of sockets.
pub struct MockUpstream {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<UpstreamConnection>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        Self::start_with_status(None).await
    }

    /// Reject every handshake with `status`.
    pub async fn rejecting(status: u16) -> Self {
        Self::start_with_status(Some(status)).await
    }

    async fn start_with_status(reject: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut captured = None;
                    let callback = |request: &Request, response: Response| {
                        captured = Some((request.uri().to_string(), request.headers().clone()));
                        match reject {
                            Some(status) => {
                                let mut error = ErrorResponse::new(Some("rejected".to_string()));
                                *error.status_mut() = http::StatusCode::from_u16(status).unwrap();
                                Err(error)
                            }
                            None => Ok(response),
                        }
                    };
                    if let Ok(socket) = accept_hdr_async(stream, callback).await {
                        let (uri, headers) = captured.unwrap();
                        let _ = tx.send(UpstreamConnection {
                            socket,
                            uri,
                            headers,
                        });
                    }
                });
            }
        });

        Self { addr, connections }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn accept(&mut self) -> UpstreamConnection {
        tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("upstream connection timed out")
            .expect("upstream listener stopped")
    }
}

/// A relay configuration pointing at `upstream`.
pub fn relay_config(upstream: &MockUpstream) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.upstream_endpoint = upstream.endpoint();
    config.upstream_deployment = "test-deployment".to_string();
    config.upstream_api_key = Some("upstream-key".to_string());
    config
}

/// Serve the full application on an ephemeral port.
pub async fn start_relay(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).unwrap();
    let app = routes::create_app_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

pub async fn connect_client(addr: SocketAddr, query: &str, headers: &[(&str, &str)]) -> ClientSocket {
    try_connect_client(addr, query, headers)
        .await
        .expect("client handshake failed")
}

pub async fn try_connect_client(
    addr: SocketAddr,
    query: &str,
    headers: &[(&str, &str)],
) -> Result<ClientSocket, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/realtime{query}")
        .into_client_request()
        .unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            http::HeaderValue::from_str(value).unwrap(),
        );
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(socket, _)| socket)
}

pub async fn send_json<S>(socket: &mut S, value: Value)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Debug,
{
    socket
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

/// Next text frame decoded as JSON, skipping control frames.
pub async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(STEP_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait for the peer to close; returns the close frame if one was sent.
pub async fn expect_closed<S>(socket: &mut S) -> Option<Message>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::time::timeout(STEP_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(message @ Message::Close(_))) => return Some(message),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
            Some(Err(_)) | None => return None,
        }
    }
}
