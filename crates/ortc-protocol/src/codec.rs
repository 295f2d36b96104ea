//! Codec for encoding commands and decoding inbound frames.
//!
//! Outbound commands travel as a JSON string literal wrapping the command
//! line. Inbound array frames (`a[...]`) hold JSON strings, each of which is a
//! JSON object; both layers are unwrapped here so callers only ever see plain
//! text.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::frames::{ops, Command, InboundFrame, HEARTBEAT_MARKER, OPEN_MARKER};

/// Prefix of an array frame.
const ARRAY_PREFIX: char = 'a';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame does not have any recognized shape.
    #[error("Unrecognized frame: {0}")]
    Unrecognized(String),

    /// The frame carried an operation this client does not handle.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A recognized operation is missing a required field.
    #[error("Missing field '{field}' in {op}")]
    MissingField { op: &'static str, field: &'static str },

    /// JSON error in either escaping layer.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a command to its wire text.
///
/// # Errors
///
/// Returns an error if the escaping layer cannot be produced.
pub fn encode(command: &Command) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&command.to_string())?)
}

/// Result of decoding one payload inside a frame.
pub type DecodedPayload = Result<InboundFrame, ProtocolError>;

/// Decode one inbound text frame.
///
/// An array frame may carry several payloads; each is decoded on its own
/// and returned in order, so one unrecognized payload does not hide the
/// others.
///
/// # Errors
///
/// Returns an error if the frame itself has no recognized shape. Callers are
/// expected to drop such frames, and likewise the individual payloads that
/// fail to decode.
pub fn decode(text: &str) -> Result<Vec<DecodedPayload>, ProtocolError> {
    match text {
        OPEN_MARKER => return Ok(vec![Ok(InboundFrame::Open)]),
        HEARTBEAT_MARKER => return Ok(vec![Ok(InboundFrame::Heartbeat)]),
        _ => {}
    }

    let body = text.strip_prefix(ARRAY_PREFIX).unwrap_or(text);
    if !body.starts_with('[') {
        return Err(ProtocolError::Unrecognized(truncate(text)));
    }

    let payloads: Vec<String> = serde_json::from_str(body)?;
    Ok(payloads.iter().map(|p| decode_payload(p)).collect())
}

/// Fields that may appear in an inbound payload object.
#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    ch: Option<String>,
    #[serde(default)]
    m: Option<String>,
    #[serde(default)]
    up: Option<Value>,
    #[serde(default)]
    ex: Option<Value>,
}

/// Decode a single payload object from inside an array frame.
///
/// # Errors
///
/// Returns an error if the payload is not a known message or operation.
pub fn decode_payload(payload: &str) -> Result<InboundFrame, ProtocolError> {
    let raw: RawPayload = serde_json::from_str(payload)?;

    let Some(op) = raw.op else {
        return match (raw.ch, raw.m) {
            (Some(channel), Some(payload)) => Ok(InboundFrame::Message { channel, payload }),
            _ => Err(ProtocolError::Unrecognized(truncate(payload))),
        };
    };

    match op.as_str() {
        ops::VALIDATED => Ok(InboundFrame::Validated {
            permissions: raw.up.and_then(permission_table),
        }),
        ops::SUBSCRIBED => Ok(InboundFrame::Subscribed {
            channel: raw.ch.ok_or(ProtocolError::MissingField {
                op: ops::SUBSCRIBED,
                field: "ch",
            })?,
        }),
        ops::UNSUBSCRIBED => Ok(InboundFrame::Unsubscribed {
            channel: raw.ch.ok_or(ProtocolError::MissingField {
                op: ops::UNSUBSCRIBED,
                field: "ch",
            })?,
        }),
        ops::ERROR => Ok(InboundFrame::Error {
            message: raw.ex.map(error_text).unwrap_or_default(),
        }),
        _ => Err(ProtocolError::UnknownOperation(op)),
    }
}

/// Convert the `up` field of a validated operation.
///
/// `null` and non-object values mean "no restrictions".
fn permission_table(up: Value) -> Option<HashMap<String, String>> {
    match up {
        Value::Object(map) => Some(
            map.into_iter()
                .map(|(pattern, grant)| {
                    let grant = match grant {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (pattern, grant)
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Extract a human-readable message from the `ex` field.
fn error_text(ex: Value) -> String {
    match ex {
        Value::String(s) => s,
        Value::Object(ref map) => match map.get("ex") {
            Some(Value::String(s)) => s.clone(),
            _ => ex.to_string(),
        },
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}
