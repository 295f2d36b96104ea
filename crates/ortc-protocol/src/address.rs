//! Transport address derivation.
//!
//! The broadcast endpoint lives under the server address with a random server
//! slot and a random connection token:
//! `ws[s]://host/broadcast/<0-999>/<token>/websocket`.

use rand::Rng;

use crate::multipart::random_id;

/// Length of the random connection token in the path.
pub const CONNECTION_TOKEN_LENGTH: usize = 8;

/// Exclusive upper bound of the server slot.
pub const SERVER_SLOT_RANGE: u32 = 1000;

/// Derive the WebSocket URL for a server address.
///
/// `server` must start with `http` (`http://` or `https://`); the scheme
/// becomes `ws://` or `wss://` respectively.
#[must_use]
pub fn websocket_url(server: &str) -> Option<String> {
    let slot = rand::thread_rng().gen_range(0..SERVER_SLOT_RANGE);
    websocket_url_with(server, slot, &random_id(CONNECTION_TOKEN_LENGTH))
}

/// Derive the WebSocket URL using an explicit slot and token.
#[must_use]
pub fn websocket_url_with(server: &str, slot: u32, token: &str) -> Option<String> {
    let rest = server.strip_prefix("http")?;
    if !(rest.starts_with("://") || rest.starts_with("s://")) {
        return None;
    }
    let rest = rest.trim_end_matches('/');
    Some(format!("ws{}/broadcast/{}/{}/websocket", rest, slot, token))
}
