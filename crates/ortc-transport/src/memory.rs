//! In-memory transport.
//!
//! Every [`Transport::open`] call produces a connected pair: the client half is
//! returned to the caller, the peer half is handed to the [`MemoryListener`],
//! where a test (or an embedded server) can push frames and read what the
//! client wrote.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, FrameSink, FrameStream, Transport, TransportError};

/// A transport whose connections are channel pairs.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

/// Receives the peer half of every connection opened on a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a transport and its listener.
    #[must_use]
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                refuse: Arc::new(AtomicBool::new(false)),
                opened: Arc::new(AtomicUsize::new(0)),
            },
            MemoryListener { peers: rx },
        )
    }

    /// Make subsequent `open` calls fail, simulating an unreachable host.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connections successfully opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(format!(
                "connection refused: {}",
                url
            )));
        }

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let state = Arc::new(PeerState::default());

        let connection = Connection::new(
            Box::new(MemorySink {
                tx: Some(to_peer),
                state: Arc::clone(&state),
            }),
            Box::new(MemoryFrames { rx: from_peer }),
        );

        let peer = MemoryPeer {
            id: connection.id,
            url: url.to_string(),
            outbound: from_client,
            inbound: Mutex::new(Some(to_client)),
            state,
        };

        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("listener dropped".into()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(connection = %connection.id, url = %url, "Memory connection opened");

        Ok(connection)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take a connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct PeerState {
    closes: AtomicUsize,
}

/// The server side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    url: String,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: Arc<PeerState>,
}

impl MemoryPeer {
    /// Connection identifier shared with the client half.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// URL the client opened.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a frame to the client. Returns `false` if the client half is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound
            .lock()
            .as_ref()
            .map(|tx| tx.send(text.into()).is_ok())
            .unwrap_or(false)
    }

    /// End the client's stream, as if the server hung up.
    pub fn hang_up(&self) {
        self.inbound.lock().take();
    }

    /// Wait for the next frame written by the client.
    ///
    /// Returns `None` once the client closed its sink and all frames were read.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Take a frame written by the client if one is already queued.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// How many times the client closed this connection.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
    state: Arc<PeerState>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text)
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.tx.take();
        Ok(())
    }
}

struct MemoryFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryFrames {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}
