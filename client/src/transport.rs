use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// A bidirectional text-frame channel to the realtime server.
///
/// `recv` must be cancel safe: the connection worker polls it inside
/// `tokio::select!` alongside timers and commands.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame, or `None` once the peer has closed the connection
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports. Swapped for an in-memory one in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket with rustls
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (ws, _response) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        Ok(Box::new(WsTransport { ws }))
    }
}

/// Low-level WebSocket connection
pub struct WsTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .context("Failed to send message")
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(message) = self.ws.next().await {
            let message = match message.context("WebSocket error") {
                Ok(message) => message,
                Err(e) => return Some(Err(e)),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Close(_) => return None,
                Message::Ping(data) => {
                    let pong = self.ws.send(Message::Pong(data)).await;
                    if let Err(e) = pong.context("Failed to send pong") {
                        return Some(Err(e));
                    }
                }
                _ => {}
            }
        }

        None
    }

    async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await.context("Failed to close WebSocket")
    }
}
