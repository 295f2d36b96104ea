//! Client errors.

use ortc_transport::TransportError;
use thiserror::Error;

use crate::permissions::Action;

/// Errors returned by session operations.
///
/// Every error returned from a public [`crate::Client`] operation is also
/// reported on the event stream as [`crate::ClientEvent::Exception`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The session is not connected.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called on a connected session.
    #[error("Already connected")]
    AlreadyConnected,

    /// `connect` was called while a fresh connect is in progress.
    #[error("Already trying to connect")]
    AlreadyConnecting,

    /// The session is shutting down.
    #[error("Disconnect in progress")]
    Disconnecting,

    /// Malformed input, wrong length or forbidden characters.
    #[error("{0}")]
    Validation(String),

    /// Host unreachable, cluster resolution or transport open failure.
    #[error("{0}")]
    Connectivity(String),

    /// No permission grant for this channel and action.
    #[error("No permissions found to {action} channel: {channel}")]
    Permission { action: Action, channel: String },

    /// The channel is not tracked by the session.
    #[error("Not subscribed to the channel '{0}'")]
    NotSubscribed(String),

    /// The channel is already subscribed or subscribing.
    #[error("Already subscribing to the channel '{0}'")]
    AlreadySubscribed(String),

    /// Encoding an outbound frame failed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Short category label, used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::NotConnected
            | ClientError::AlreadyConnected
            | ClientError::AlreadyConnecting
            | ClientError::Disconnecting => "state",
            ClientError::Validation(_) => "validation",
            ClientError::Connectivity(_) => "connectivity",
            ClientError::Permission { .. } => "permission",
            ClientError::NotSubscribed(_) | ClientError::AlreadySubscribed(_) => "subscription",
            ClientError::Protocol(_) => "protocol",
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Connectivity(e.to_string())
    }
}

impl From<ortc_protocol::ProtocolError> for ClientError {
    fn from(e: ortc_protocol::ProtocolError) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(ClientError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            ClientError::Permission {
                action: Action::Subscribe,
                channel: "blue".into()
            }
            .to_string(),
            "No permissions found to subscribe channel: blue"
        );
        assert_eq!(
            ClientError::from(TransportError::Timeout),
            ClientError::Connectivity("Connection timed out".into())
        );
    }
}
