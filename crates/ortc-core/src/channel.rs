//! Channel subscriptions for ORTC.
//!
//! The registry tracks every channel the session subscribed to, from the
//! moment the subscribe frame is sent until the server confirms removal.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::client::Client;
use crate::error::ClientError;

/// Maximum channel name length, in characters.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 100;

/// Handler invoked with `(client, channel, message)` for every complete message.
pub type MessageHandler = Arc<dyn Fn(&Client, &str, &str) + Send + Sync>;

/// Whether `c` may appear in keys, tokens and channel names.
pub(crate) fn is_safe_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '/' | '.')
}

/// Whether every character of `input` is safe for the wire grammar.
#[must_use]
pub fn is_safe_input(input: &str) -> bool {
    input.chars().all(is_safe_char)
}

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel is null or empty");
    }
    if !is_safe_input(name) {
        return Err("Channel has invalid characters");
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel size exceeds the limit of 100 characters");
    }
    Ok(())
}

/// A tracked channel.
#[derive(Clone)]
pub struct ChannelSubscription {
    /// Channel name.
    pub name: String,
    /// Subscribe frame sent, acknowledgment pending.
    pub subscribing: bool,
    /// Acknowledged by the server.
    pub subscribed: bool,
    /// Whether to subscribe again after a reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Message handler.
    pub handler: MessageHandler,
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("name", &self.name)
            .field("subscribing", &self.subscribing)
            .field("subscribed", &self.subscribed)
            .field("resubscribe_on_reconnect", &self.resubscribe_on_reconnect)
            .finish_non_exhaustive()
    }
}

/// Registry of channel subscriptions, indexed by name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelSubscription>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a channel as subscribing.
    ///
    /// A channel left over from a reconnect (both flags cleared) is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is already subscribing or subscribed.
    pub fn begin_subscribe(
        &self,
        name: &str,
        resubscribe_on_reconnect: bool,
        handler: MessageHandler,
    ) -> Result<(), ClientError> {
        let record = ChannelSubscription {
            name: name.to_string(),
            subscribing: true,
            subscribed: false,
            resubscribe_on_reconnect,
            handler,
        };

        match self.channels.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().subscribing || entry.get().subscribed {
                    return Err(ClientError::AlreadySubscribed(name.to_string()));
                }
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }

        debug!(channel = %name, resubscribe_on_reconnect, "Subscribing");
        Ok(())
    }

    /// Record the server's acknowledgment.
    ///
    /// Returns `true` if the channel is tracked.
    pub fn confirm_subscribed(&self, name: &str) -> bool {
        match self.channels.get_mut(name) {
            Some(mut record) => {
                record.subscribing = false;
                record.subscribed = true;
                debug!(channel = %name, "Subscribed");
                true
            }
            None => false,
        }
    }

    /// Stop tracking a channel.
    pub fn remove(&self, name: &str) -> Option<ChannelSubscription> {
        let removed = self.channels.remove(name).map(|(_, record)| record);
        if removed.is_some() {
            debug!(channel = %name, "Unsubscribed");
        }
        removed
    }

    /// Clear the resubscribe flag of a channel.
    ///
    /// Returns `true` if the channel is tracked.
    pub fn disable_resubscribe(&self, name: &str) -> bool {
        match self.channels.get_mut(name) {
            Some(mut record) => {
                record.resubscribe_on_reconnect = false;
                true
            }
            None => false,
        }
    }

    /// Clear the flags of every channel and drop those not marked for resubscription.
    ///
    /// Returns the names of the dropped channels.
    pub fn prune_for_reconnect(&self) -> Vec<String> {
        let mut dropped = Vec::new();
        self.channels.retain(|name, record| {
            record.subscribing = false;
            record.subscribed = false;
            if !record.resubscribe_on_reconnect {
                dropped.push(name.clone());
            }
            record.resubscribe_on_reconnect
        });
        trace!(dropped = dropped.len(), kept = self.channels.len(), "Pruned channels");
        dropped
    }

    /// Channels to subscribe again after a reconnect, with their handlers.
    #[must_use]
    pub fn pending_resubscriptions(&self) -> Vec<(String, MessageHandler)> {
        self.channels
            .iter()
            .filter(|r| !r.subscribing && !r.subscribed)
            .map(|r| (r.key().clone(), Arc::clone(&r.handler)))
            .collect()
    }

    /// Get the message handler of a tracked channel.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<MessageHandler> {
        self.channels.get(name).map(|r| Arc::clone(&r.handler))
    }

    /// Get a snapshot of a tracked channel.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ChannelSubscription> {
        self.channels.get(name).map(|r| r.clone())
    }

    /// Whether the channel is tracked.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Whether the server acknowledged the channel.
    #[must_use]
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.channels.get(name).map(|r| r.subscribed).unwrap_or(false)
    }

    /// Whether a subscribe frame is awaiting acknowledgment.
    #[must_use]
    pub fn is_subscribing(&self, name: &str) -> bool {
        self.channels.get(name).map(|r| r.subscribing).unwrap_or(false)
    }

    /// Number of tracked channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Stop tracking every channel.
    pub fn clear(&self) {
        self.channels.clear();
    }
}
