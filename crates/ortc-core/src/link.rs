//! The session's handle on one open transport connection.
//!
//! Outbound frames are queued to a writer task that owns the sink, so no lock
//! is ever held across a network write. Closing a link cancels its token; the
//! writer task then closes the sink, which happens once per link.

use ortc_transport::{ConnectionId, FrameSink};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ClientError;
use crate::event::{ClientEvent, EventSender};
use crate::metrics;

/// Handle on one open connection.
#[derive(Debug)]
pub(crate) struct Link {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    token: CancellationToken,
    closed: AtomicBool,
}

impl Link {
    /// Wrap a sink, spawning its writer task.
    pub(crate) fn spawn(id: ConnectionId, sink: Box<dyn FrameSink>, events: EventSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        tokio::spawn(writer_task(id, sink, rx, token.clone(), events));
        Self {
            id,
            outbound: tx,
            token,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Token cancelled when the link closes.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Queue one encoded frame.
    ///
    /// Fails fast if the link is closed or its writer has stopped.
    pub(crate) fn send(&self, frame: String) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Close the link. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(connection = %self.id, "Closing connection");
        self.token.cancel();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn writer_task(
    id: ConnectionId,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
    events: EventSender,
) {
    loop {
        tokio::select! {
            biased;

            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                trace!(connection = %id, len = frame.len(), "Writing frame");
                if let Err(e) = sink.send(frame).await {
                    warn!(connection = %id, error = %e, "Write failed");
                    metrics::record_exception("transport");
                    let _ = events.send(ClientEvent::Exception(e.to_string()));
                    break;
                }
                metrics::record_frame("outbound");
            }

            _ = token.cancelled() => break,
        }
    }

    // Drop queued frames before closing so late sends fail fast.
    rx.close();
    if let Err(e) = sink.close().await {
        warn!(connection = %id, error = %e, "Failed to close connection");
    }
    debug!(connection = %id, "Writer stopped");
}
