//! Inbound frame routing.
//!
//! Each open link has one receive loop. It decodes every frame and
//! dispatches it: the open marker triggers the handshake, data goes through
//! reassembly to the channel's handler, and server operations update the
//! session. Frames that do not decode are dropped.

use ortc_protocol::{codec, Command, InboundFrame};
use ortc_transport::FrameStream;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::client::Client;
use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::heartbeat;
use crate::link::Link;
use crate::metrics;
use crate::permissions::Permissions;
use crate::state::ConnectionState;

/// Read frames from `stream` until the link closes or the stream ends.
pub(crate) async fn receive_loop(
    client: Client,
    link: Arc<Link>,
    mut stream: Box<dyn FrameStream>,
) {
    debug!(connection = %link.id(), "Receive loop started");

    loop {
        let received = tokio::select! {
            biased;

            _ = link.token().cancelled() => break,
            received = stream.recv() => received,
        };

        match received {
            Ok(Some(text)) => client.handle_frame(&link, &text),
            Ok(None) => {
                debug!(connection = %link.id(), "Connection closed by server");
                break;
            }
            Err(e) => {
                warn!(connection = %link.id(), error = %e, "Receive failed");
                break;
            }
        }
    }

    client.receive_ended(&link);
    debug!(connection = %link.id(), "Receive loop stopped");
}

impl Client {
    /// Dispatch one inbound frame.
    pub(crate) fn handle_frame(&self, link: &Arc<Link>, text: &str) {
        if link.is_closed() {
            return;
        }
        self.inner.alive.store(true, Ordering::SeqCst);
        metrics::record_frame("inbound");

        let frames = match codec::decode(text) {
            Ok(frames) => frames,
            Err(e) => {
                trace!(connection = %link.id(), error = %e, "Dropping undecodable frame");
                return;
            }
        };

        for frame in frames {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    trace!(connection = %link.id(), error = %e, "Dropping undecodable payload");
                    continue;
                }
            };
            trace!(connection = %link.id(), kind = frame.kind(), "Frame");
            match frame {
                InboundFrame::Open => self.send_validate(link),
                InboundFrame::Heartbeat => {}
                InboundFrame::Message { channel, payload } => self.deliver(&channel, &payload),
                InboundFrame::Validated { permissions } => self.on_validated(link, permissions),
                InboundFrame::Subscribed { channel } => {
                    if self.inner.channels.confirm_subscribed(&channel) {
                        self.emit(ClientEvent::Subscribed(channel));
                    }
                }
                InboundFrame::Unsubscribed { channel } => {
                    if self.inner.channels.remove(&channel).is_some() {
                        self.emit(ClientEvent::Unsubscribed(channel));
                    }
                }
                InboundFrame::Error { message } => {
                    warn!(error = %message, "Server reported an error");
                    metrics::record_exception("server");
                    self.emit(ClientEvent::Exception(message));
                }
            }
        }
    }

    fn send_validate(&self, link: &Arc<Link>) {
        let command = {
            let session = self.inner.session.lock();
            if !session.is_current(link) {
                return;
            }
            Command::validate(
                &session.app_key,
                &session.auth_token,
                &self.inner.config.announcement_subchannel,
                &session.session_id,
                &self.inner.config.connection_metadata,
            )
        };

        let sent = codec::encode(&command)
            .map_err(ClientError::from)
            .and_then(|frame| link.send(frame));
        if let Err(e) = sent {
            self.report(&e);
        }
    }

    fn deliver(&self, channel: &str, payload: &str) {
        // Untracked channels are dropped before touching the buffer.
        if !self.inner.channels.contains(channel) {
            trace!(channel = %channel, "Dropping message for untracked channel");
            return;
        }
        let Some(message) = self.inner.reassembler.push(payload) else {
            return;
        };
        if let Some(handler) = self.inner.channels.handler(channel) {
            metrics::record_delivery();
            handler(self, channel, &message);
        }
    }

    fn on_validated(&self, link: &Arc<Link>, permissions: Option<HashMap<String, String>>) {
        let (prior, heartbeat) = {
            let mut session = self.inner.session.lock();
            if !session.is_current(link) {
                return;
            }
            session.permissions = Permissions::from(permissions);

            let prior = session.state;
            if !matches!(
                prior,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) {
                debug!(state = %prior, "Permissions refreshed");
                return;
            }
            session.state = ConnectionState::Connected;

            if let Some(token) = session.reconnect.take() {
                token.cancel();
            }
            if let Some(token) = session.heartbeat.take() {
                token.cancel();
            }
            let heartbeat = link.token().child_token();
            session.heartbeat = Some(heartbeat.clone());
            (prior, heartbeat)
        };

        tokio::spawn(heartbeat::monitor(self.clone(), Arc::clone(link), heartbeat));

        if prior == ConnectionState::Reconnecting {
            let pending = self.inner.channels.pending_resubscriptions();
            info!(channels = pending.len(), "Reconnected");
            for (channel, handler) in pending {
                // Failures are reported as exceptions.
                let _ = self.subscribe_with(&channel, true, handler);
            }
            self.emit(ClientEvent::Reconnected);
        } else {
            info!("Connected");
            self.emit(ClientEvent::Connected);
        }
    }

    /// Called once the receive loop of `link` stops.
    fn receive_ended(&self, link: &Arc<Link>) {
        let lost_handshake = {
            let mut session = self.inner.session.lock();
            if !session.is_current(link) || session.state != ConnectionState::Connecting {
                false
            } else {
                session.state = ConnectionState::Disconnected;
                session.link = None;
                true
            }
        };

        if lost_handshake {
            link.close();
            warn!(connection = %link.id(), "Connection closed before handshake");
            self.report(&ClientError::Connectivity(
                "Connection closed before handshake".into(),
            ));
        }
    }
}
