//! Reassembly of multipart messages.
//!
//! Parts may arrive in any order. A message is released exactly once, when
//! its last missing part arrives, and its buffer is discarded at that moment.
//! At most a fixed number of messages are buffered; starting one more drops
//! the one that started first.

use ortc_protocol::multipart;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{trace, warn};

/// Default number of messages buffered at once.
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Fragments received so far for one message.
#[derive(Debug)]
pub struct PartialMessage {
    total: usize,
    parts: BTreeMap<usize, String>,
}

impl PartialMessage {
    /// Create an empty buffer for a message of `total` parts.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            parts: BTreeMap::new(),
        }
    }

    /// Store a fragment at its 1-based index. Later copies replace earlier ones.
    pub fn insert(&mut self, index: usize, fragment: &str) {
        if (1..=self.total).contains(&index) {
            self.parts.insert(index, fragment.to_string());
        }
    }

    /// Whether every index `1..=total` is present.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.parts.len() == self.total
    }

    /// Concatenate the fragments in index order.
    #[must_use]
    pub fn assemble(self) -> String {
        self.parts.into_values().collect()
    }
}

/// Buffers partial messages by message id.
#[derive(Debug)]
pub struct Reassembler {
    limit: usize,
    pending: Mutex<Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    messages: HashMap<String, (u64, PartialMessage)>,
    next_seq: u64,
}

impl Pending {
    /// Drop the message whose first part arrived earliest.
    fn evict_oldest(&mut self) {
        let oldest = self
            .messages
            .iter()
            .min_by_key(|(_, (seq, _))| *seq)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.messages.remove(&id);
            warn!(message_id = %id, "Dropping incomplete message");
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING)
    }
}

impl Reassembler {
    /// Create an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty reassembler buffering at most `limit` messages.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Feed one data payload.
    ///
    /// Returns the complete message when this payload finishes one. A payload
    /// without a valid multipart header is returned as is.
    pub fn push(&self, payload: &str) -> Option<String> {
        let Some(part) = multipart::parse(payload) else {
            return Some(payload.to_string());
        };

        if part.is_whole() {
            return Some(part.fragment.to_string());
        }

        let mut pending = self.pending.lock();
        if !pending.messages.contains_key(part.id) {
            if pending.messages.len() >= self.limit {
                pending.evict_oldest();
            }
            let seq = pending.next_seq;
            pending.next_seq += 1;
            pending
                .messages
                .insert(part.id.to_string(), (seq, PartialMessage::new(part.total)));
        }
        let Some((_, entry)) = pending.messages.get_mut(part.id) else {
            return None;
        };

        if entry.total != part.total {
            warn!(
                message_id = %part.id,
                expected = entry.total,
                got = part.total,
                "Dropping part with mismatched total"
            );
            return None;
        }

        entry.insert(part.index, part.fragment);
        trace!(message_id = %part.id, index = part.index, total = part.total, "Buffered part");

        if !entry.is_ready() {
            return None;
        }

        pending
            .messages
            .remove(part.id)
            .map(|(_, message)| message.assemble())
    }

    /// Number of messages waiting for parts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().messages.len()
    }

    /// Discard every partial message.
    pub fn clear(&self) {
        self.pending.lock().messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ortc_protocol::multipart::{encode_parts, MAX_MESSAGE_SIZE};

    #[test]
    fn test_single_part_bypasses_buffer() {
        let reassembler = Reassembler::new();
        assert_eq!(
            reassembler.push("Ab3dE6gH_1-1_hello").as_deref(),
            Some("hello")
        );
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_headerless_payload_is_delivered_verbatim() {
        let reassembler = Reassembler::new();
        assert_eq!(reassembler.push("no header").as_deref(), Some("no header"));
    }

    #[test]
    fn test_reversed_arrival_order() {
        let message: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let mut parts = encode_parts("Ab3dE6gH", &message, MAX_MESSAGE_SIZE);
        assert_eq!(parts.len(), 4);
        parts.reverse();

        let reassembler = Reassembler::new();
        let mut delivered = Vec::new();
        for part in &parts {
            if let Some(done) = reassembler.push(part) {
                delivered.push(done);
            }
        }

        assert_eq!(delivered, vec![message]);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_delivers_once_per_id() {
        let reassembler = Reassembler::new();
        assert!(reassembler.push("id000001_2-2_world").is_none());
        assert!(reassembler.push("id000001_2-2_world").is_none());
        assert_eq!(
            reassembler.push("id000001_1-2_hello ").as_deref(),
            Some("hello world")
        );
        // A late duplicate starts a fresh buffer and never completes on its own.
        assert!(reassembler.push("id000001_2-2_world").is_none());
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_interleaved_messages() {
        let reassembler = Reassembler::new();
        assert!(reassembler.push("aaaaaaaa_1-2_A1").is_none());
        assert!(reassembler.push("bbbbbbbb_2-2_B2").is_none());
        assert_eq!(reassembler.push("bbbbbbbb_1-2_B1").as_deref(), Some("B1B2"));
        assert_eq!(reassembler.push("aaaaaaaa_2-2_A2").as_deref(), Some("A1A2"));
    }

    #[test]
    fn test_mismatched_total_is_ignored() {
        let reassembler = Reassembler::new();
        assert!(reassembler.push("cccccccc_1-2_x").is_none());
        assert!(reassembler.push("cccccccc_2-3_y").is_none());
        assert_eq!(reassembler.push("cccccccc_2-2_z").as_deref(), Some("xz"));
        reassembler.clear();
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_oldest_incomplete_message_is_evicted() {
        let reassembler = Reassembler::with_limit(2);
        assert!(reassembler.push("aaaaaaaa_1-2_A1").is_none());
        assert!(reassembler.push("bbbbbbbb_1-2_B1").is_none());
        // Parts of a buffered message never evict anything.
        assert!(reassembler.push("aaaaaaaa_1-2_A1").is_none());
        assert!(reassembler.push("cccccccc_1-2_C1").is_none());
        assert_eq!(reassembler.pending(), 2);

        // "aaaaaaaa" started first, so it was dropped.
        assert!(reassembler.push("aaaaaaaa_2-2_A2").is_none());
        assert_eq!(reassembler.pending(), 2);
        assert_eq!(reassembler.push("cccccccc_2-2_C2").as_deref(), Some("C1C2"));
    }

    #[test]
    fn test_fresh_ids_stay_bounded() {
        let reassembler = Reassembler::with_limit(8);
        for i in 0..1_000 {
            assert!(reassembler.push(&format!("{:08}_1-2_x", i)).is_none());
        }
        assert_eq!(reassembler.pending(), 8);
    }
}
