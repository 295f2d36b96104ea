//! # ortc-transport
//!
//! Client transport abstraction layer for the ORTC realtime client.
//!
//! This crate provides a unified interface for opening a full-duplex text
//! connection:
//!
//! - **WebSocket** - The production transport (`ws://` and `wss://`)
//! - **Memory** - Channel pairs, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` trait and return a `Connection`
//! split into a `FrameSink` and a `FrameStream`, so the session can read and
//! write concurrently.
//!
//! ```rust,ignore
//! use ortc_transport::{Transport, Connection};
//!
//! async fn pump(transport: &dyn Transport) {
//!     let Connection { mut stream, .. } = transport.open("wss://host/broadcast/1/abcdefgh/websocket").await?;
//!     while let Ok(Some(frame)) = stream.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use traits::{Connection, ConnectionId, FrameSink, FrameStream, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
