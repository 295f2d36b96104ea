//! # ortc-protocol
//!
//! Wire protocol definitions for the ORTC realtime messaging client.
//!
//! The protocol is text based. The client sends semicolon-separated commands
//! wrapped in a JSON string literal; the server answers with single-character
//! markers or array frames carrying JSON objects.
//!
//! ## Frame Types
//!
//! - `validate` / `subscribe` / `unsubscribe` / `send` - Client commands
//! - `o` / `h` - Open and heartbeat markers
//! - `{ch, m}` - Channel messages, possibly split into parts
//! - `ortc-validated` / `ortc-subscribed` / `ortc-unsubscribed` / `ortc-error` - Server operations
//!
//! ## Example
//!
//! ```rust
//! use ortc_protocol::{codec, Command, InboundFrame};
//!
//! let wire = codec::encode(&Command::unsubscribe("app-key", "blue")).unwrap();
//! assert_eq!(wire, "\"unsubscribe;app-key;blue\"");
//!
//! let frames = codec::decode("h").unwrap();
//! assert!(matches!(frames.as_slice(), [Ok(InboundFrame::Heartbeat)]));
//! ```

pub mod address;
pub mod codec;
pub mod frames;
pub mod multipart;

pub use codec::{decode, encode, DecodedPayload, ProtocolError};
pub use frames::{Command, InboundFrame};
pub use multipart::{MessagePart, MAX_MESSAGE_SIZE};
