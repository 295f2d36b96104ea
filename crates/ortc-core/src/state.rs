//! Connection state of a session.

use std::fmt;

/// Lifecycle state of a [`crate::Client`].
///
/// Allowed transitions:
///
/// ```text
/// Disconnected --connect--> Connecting --validated--> Connected
/// Connected --heartbeat timeout--> Reconnecting --validated--> Connected
/// Connected | Reconnecting --disconnect--> Disconnecting --> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl ConnectionState {
    /// Whether `disconnect` is allowed from this state.
    #[must_use]
    pub fn can_disconnect(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
