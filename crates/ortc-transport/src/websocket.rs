//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{Connection, FrameSink, FrameStream, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum time allowed for the TCP/TLS/WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(url))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| {
                    error!("WebSocket handshake failed: {}", e);
                    TransportError::ConnectFailed(e.to_string())
                })?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = ws_stream.split();
        Ok(Connection::new(
            Box::new(WebSocketSink { sink }),
            Box::new(WebSocketFrames { stream }),
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}

/// Read half of a WebSocket connection.
pub struct WebSocketFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by tungstenite and flushed with the next write
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
