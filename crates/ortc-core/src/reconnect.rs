//! Reconnection loop.

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::Client;
use crate::metrics;
use crate::state::ConnectionState;

/// Retry `connect` with the last credentials until the session is connected
/// again, disconnected, or `token` is cancelled.
///
/// The loop ticks at a fixed period and attempts a connect once enough ticks
/// have passed since the previous attempt, whatever that attempt's outcome.
pub(crate) async fn run(client: Client, token: CancellationToken) {
    let config = client.inner.config.reconnect.clone();
    let ticks_per_attempt = config.ticks_per_attempt();
    let mut ticker = interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    info!(interval_ms = config.interval_ms, "Reconnection loop started");
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let state = client.state();
        if matches!(
            state,
            ConnectionState::Connected
                | ConnectionState::Disconnecting
                | ConnectionState::Disconnected
        ) {
            break;
        }

        ticks += 1;
        if ticks < ticks_per_attempt {
            continue;
        }
        ticks = 0;

        metrics::record_reconnect_attempt();
        let (app_key, auth_token) = client.last_credentials();
        if let Err(e) = client.connect(&app_key, &auth_token).await {
            debug!(error = %e, "Reconnect attempt failed");
        }
    }

    debug!("Reconnection loop stopped");
}
