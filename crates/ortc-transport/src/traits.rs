//! Transport abstraction traits for ORTC.
//!
//! A transport opens one full-duplex text connection and hands back its two
//! halves separately, so that a receive loop can block on the stream while
//! other tasks keep writing to the sink.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Process-wide counter so identifiers never repeat.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to open the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// The two halves of an open connection.
pub struct Connection {
    /// Connection identifier, for logging.
    pub id: ConnectionId,
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    /// Bundle two halves under a fresh identifier.
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) -> Self {
        Self {
            id: ConnectionId::next(),
            sink,
            stream,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// A transport that can open client connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the given URL.
    async fn open(&self, url: &str) -> Result<Connection, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
