//! Liveness monitoring.
//!
//! While connected, a monitor ticks at a fixed period. Every inbound frame
//! marks the session alive; a tick that finds it alive resets the missed
//! count, any other tick increments it. Once the count exceeds the limit the
//! connection is torn down and the reconnection loop takes over.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::event::ClientEvent;
use crate::link::Link;
use crate::metrics;
use crate::reconnect;
use crate::state::ConnectionState;

/// Watch `link` until `token` is cancelled or the connection is declared dead.
pub(crate) async fn monitor(client: Client, link: Arc<Link>, token: CancellationToken) {
    let config = client.inner.config.heartbeat.clone();
    let mut ticker = interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    debug!(connection = %link.id(), "Heartbeat monitor armed");
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if client.inner.alive.swap(false, Ordering::SeqCst) {
            missed = 0;
            continue;
        }

        missed += 1;
        if missed > config.max_missed {
            client.heartbeat_failed(&link);
            break;
        }
    }

    debug!(connection = %link.id(), "Heartbeat monitor stopped");
}

impl Client {
    /// Tear down a dead connection and start reconnecting.
    ///
    /// Does nothing unless `link` is still the live link of a connected
    /// session, so a concurrent disconnect or reconnect wins.
    fn heartbeat_failed(&self, link: &Arc<Link>) {
        let reconnect = {
            let mut session = self.inner.session.lock();
            if session.state != ConnectionState::Connected || !session.is_current(link) {
                return;
            }
            session.state = ConnectionState::Reconnecting;
            session.heartbeat = None;
            session.link = None;

            let token = CancellationToken::new();
            if let Some(previous) = session.reconnect.replace(token.clone()) {
                previous.cancel();
            }
            token
        };

        warn!(connection = %link.id(), "Heartbeat lost, reconnecting");
        metrics::record_heartbeat_failure();
        link.close();

        let dropped = self.inner.channels.prune_for_reconnect();
        if !dropped.is_empty() {
            debug!(channels = ?dropped, "Dropped channels without resubscription");
        }
        self.inner.reassembler.clear();

        self.emit(ClientEvent::Reconnecting);
        tokio::spawn(reconnect::run(self.clone(), reconnect));
    }
}
