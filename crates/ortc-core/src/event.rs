//! Session events delivered to the application.

use tokio::sync::mpsc;

/// An event emitted by a [`crate::Client`].
///
/// Channel messages are not events; they go to the handler given to
/// [`crate::Client::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The handshake completed on a fresh connect.
    Connected,
    /// `disconnect` finished.
    Disconnected,
    /// The heartbeat monitor declared the connection dead.
    Reconnecting,
    /// The handshake completed after a reconnect.
    Reconnected,
    /// The server acknowledged a subscription.
    Subscribed(String),
    /// The server removed a subscription.
    Unsubscribed(String),
    /// An operation failed or the server reported an error.
    Exception(String),
}

/// Receiving end of the event stream.
pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Create an event channel.
pub(crate) fn channel() -> (EventSender, EventStream) {
    mpsc::unbounded_channel()
}
