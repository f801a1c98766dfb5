//! WebSocket transport over tokio-tungstenite

use super::{FrameSink, FrameStream, Link, Transport};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` / `wss://` links to the agent backend
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a transport for the given URL (must use ws:// or wss://)
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| SessionError::Config(format!("Invalid WebSocket URL '{}': {}", url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(SessionError::Config(format!(
                "WebSocket URL must use ws:// or wss://, got: {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            url: parsed.to_string(),
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<Link> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SessionError::Connection(format!("{}: {}", self.url, e)))?;

        tracing::debug!(url = %self.url, "WebSocket handshake complete");

        let (writer, reader) = stream.split();
        Ok(Link::new(WsSink { writer }, WsReader { reader }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

struct WsSink {
    writer: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.writer
            .send(Message::Text(frame))
            .await
            .map_err(|e| SessionError::Connection(format!("send failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.writer
            .close()
            .await
            .map_err(|e| SessionError::Connection(format!("close failed: {}", e)))
    }
}

struct WsReader {
    reader: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next(&mut self) -> Result<Option<String>> {
        loop {
            match self.reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "WebSocket closed by peer");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(SessionError::Connection(format!("receive failed: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_http_scheme() {
        let err = WebSocketTransport::new("http://localhost:8000/ws")
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_rejects_garbage_url() {
        assert!(WebSocketTransport::new("not a url").is_err());
    }

    #[test]
    fn test_accepts_ws_and_wss() {
        let ws = WebSocketTransport::new("ws://localhost:8000/ws").unwrap();
        assert_eq!(ws.endpoint(), "ws://localhost:8000/ws");
        assert_eq!(ws.name(), "websocket");
        assert!(WebSocketTransport::new("wss://agent.example.com/ws").is_ok());
    }
}
