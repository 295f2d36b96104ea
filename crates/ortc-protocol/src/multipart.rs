//! Multipart message framing.
//!
//! Messages longer than [`MAX_MESSAGE_SIZE`] characters are split into parts.
//! Every part carries a header `<messageId>_<partIndex>-<partTotal>_` in
//! front of its fragment; indices are 1-based.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Maximum number of characters carried by a single part.
pub const MAX_MESSAGE_SIZE: usize = 800;

/// Length of a generated message identifier.
pub const MESSAGE_ID_LENGTH: usize = 8;

/// One part of a multipart message, borrowed from the payload it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePart<'a> {
    /// Sender-assigned message identifier.
    pub id: &'a str,
    /// 1-based index of this part.
    pub index: usize,
    /// Total number of parts.
    pub total: usize,
    /// The fragment text.
    pub fragment: &'a str,
}

impl MessagePart<'_> {
    /// Whether the message fits in a single part.
    #[must_use]
    pub fn is_whole(&self) -> bool {
        self.total == 1
    }
}

/// Generate a random alphanumeric identifier of the given length.
#[must_use]
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a message identifier.
#[must_use]
pub fn generate_message_id() -> String {
    random_id(MESSAGE_ID_LENGTH)
}

/// Split a message into fragments of at most `max_chars` characters.
///
/// The last fragment may be shorter. An empty message yields no fragments.
#[must_use]
pub fn split(message: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::with_capacity(message.len() / max_chars + 1);
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in message.char_indices() {
        if count == max_chars {
            parts.push(&message[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < message.len() {
        parts.push(&message[start..]);
    }

    parts
}

/// Build the payloads for every part of a message, sharing one identifier.
#[must_use]
pub fn encode_parts(message_id: &str, message: &str, max_chars: usize) -> Vec<String> {
    let fragments = split(message, max_chars);
    let total = fragments.len();
    fragments
        .into_iter()
        .enumerate()
        .map(|(i, fragment)| format!("{}_{}-{}_{}", message_id, i + 1, total, fragment))
        .collect()
}

/// Parse the multipart header of a payload.
///
/// Returns `None` if the header is absent or inconsistent; such payloads are
/// treated as a whole message by the caller.
#[must_use]
pub fn parse(payload: &str) -> Option<MessagePart<'_>> {
    let (id, rest) = split_field(payload, '_')?;
    let (index, rest) = split_field(rest, '-')?;
    let (total, fragment) = split_field(rest, '_')?;

    let index: usize = index.parse().ok()?;
    let total: usize = total.parse().ok()?;
    if total == 0 || index == 0 || index > total {
        return None;
    }

    Some(MessagePart {
        id,
        index,
        total,
        fragment,
    })
}

/// Split at the first `delim` that follows a non-empty field.
fn split_field(text: &str, delim: char) -> Option<(&str, &str)> {
    let first = text.chars().next()?;
    let skip = first.len_utf8();
    let pos = text[skip..].find(delim)? + skip;
    Some((&text[..pos], &text[pos + delim.len_utf8()..]))
}
