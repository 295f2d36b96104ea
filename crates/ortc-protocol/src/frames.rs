//! Frame types for the ORTC protocol.
//!
//! Outbound traffic is a small set of semicolon-separated commands. Inbound
//! traffic is either a one-character marker (`o`, `h`) or an array frame
//! carrying JSON objects that describe a channel message or a server
//! operation.

use std::collections::HashMap;
use std::fmt;

/// Literal open marker sent by the server once the socket is ready.
pub const OPEN_MARKER: &str = "o";

/// Literal heartbeat marker.
pub const HEARTBEAT_MARKER: &str = "h";

/// Server operation names.
pub mod ops {
    pub const VALIDATED: &str = "ortc-validated";
    pub const SUBSCRIBED: &str = "ortc-subscribed";
    pub const UNSUBSCRIBED: &str = "ortc-unsubscribed";
    pub const ERROR: &str = "ortc-error";
}

/// A command sent from the client to the server.
///
/// The `Display` implementation renders the raw command line; use
/// [`crate::codec::encode`] to obtain the escaped wire text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Handshake sent after the open marker.
    Validate {
        app_key: String,
        auth_token: String,
        announcement_subchannel: String,
        session_id: String,
        connection_metadata: String,
    },

    /// Subscribe to a channel.
    Subscribe {
        app_key: String,
        auth_token: String,
        channel: String,
        permission_hash: String,
    },

    /// Unsubscribe from a channel.
    Unsubscribe { app_key: String, channel: String },

    /// Publish one part of a message.
    Send {
        app_key: String,
        auth_token: String,
        channel: String,
        permission_hash: String,
        /// Multipart header and fragment, `<id>_<index>-<total>_<fragment>`.
        payload: String,
    },
}

impl Command {
    /// Create a new Validate command.
    #[must_use]
    pub fn validate(
        app_key: impl Into<String>,
        auth_token: impl Into<String>,
        announcement_subchannel: impl Into<String>,
        session_id: impl Into<String>,
        connection_metadata: impl Into<String>,
    ) -> Self {
        Command::Validate {
            app_key: app_key.into(),
            auth_token: auth_token.into(),
            announcement_subchannel: announcement_subchannel.into(),
            session_id: session_id.into(),
            connection_metadata: connection_metadata.into(),
        }
    }

    /// Create a new Subscribe command.
    #[must_use]
    pub fn subscribe(
        app_key: impl Into<String>,
        auth_token: impl Into<String>,
        channel: impl Into<String>,
        permission_hash: impl Into<String>,
    ) -> Self {
        Command::Subscribe {
            app_key: app_key.into(),
            auth_token: auth_token.into(),
            channel: channel.into(),
            permission_hash: permission_hash.into(),
        }
    }

    /// Create a new Unsubscribe command.
    #[must_use]
    pub fn unsubscribe(app_key: impl Into<String>, channel: impl Into<String>) -> Self {
        Command::Unsubscribe {
            app_key: app_key.into(),
            channel: channel.into(),
        }
    }

    /// Create a new Send command.
    #[must_use]
    pub fn send(
        app_key: impl Into<String>,
        auth_token: impl Into<String>,
        channel: impl Into<String>,
        permission_hash: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Command::Send {
            app_key: app_key.into(),
            auth_token: auth_token.into(),
            channel: channel.into(),
            permission_hash: permission_hash.into(),
            payload: payload.into(),
        }
    }

    /// The command keyword.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Validate { .. } => "validate",
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::Send { .. } => "send",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Validate {
                app_key,
                auth_token,
                announcement_subchannel,
                session_id,
                connection_metadata,
            } => write!(
                f,
                "validate;{app_key};{auth_token};{announcement_subchannel};{session_id};{connection_metadata};"
            ),
            Command::Subscribe {
                app_key,
                auth_token,
                channel,
                permission_hash,
            } => write!(
                f,
                "subscribe;{app_key};{auth_token};{channel};{permission_hash}"
            ),
            Command::Unsubscribe { app_key, channel } => {
                write!(f, "unsubscribe;{app_key};{channel}")
            }
            Command::Send {
                app_key,
                auth_token,
                channel,
                permission_hash,
                payload,
            } => write!(
                f,
                "send;{app_key};{auth_token};{channel};{permission_hash};{payload}"
            ),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// The socket is open; the client should validate.
    Open,

    /// Keepalive.
    Heartbeat,

    /// A (possibly partial) message published on a channel.
    Message {
        channel: String,
        /// Multipart header and fragment, unescaped.
        payload: String,
    },

    /// Handshake accepted. `None` means the session has no restrictions.
    Validated {
        permissions: Option<HashMap<String, String>>,
    },

    /// Subscription acknowledged.
    Subscribed { channel: String },

    /// Unsubscription acknowledged, or pushed by the server.
    Unsubscribed { channel: String },

    /// Error reported by the server.
    Error { message: String },
}

impl InboundFrame {
    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Open => "open",
            InboundFrame::Heartbeat => "heartbeat",
            InboundFrame::Message { .. } => "message",
            InboundFrame::Validated { .. } => ops::VALIDATED,
            InboundFrame::Subscribed { .. } => ops::SUBSCRIBED,
            InboundFrame::Unsubscribed { .. } => ops::UNSUBSCRIBED,
            InboundFrame::Error { .. } => ops::ERROR,
        }
    }
}
