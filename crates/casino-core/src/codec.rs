//! Wire envelope and its textual encoding.
//!
//! Every frame exchanged with the server, in either direction, is a JSON
//! object `{"type": <string>, "payload": <any>, "nonce": <integer>}`.
//! Responses echo the nonce of the request they answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CodecError;

/// Structured message exchanged with the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Logical operation (e.g. `auth/login`, `db/op:res`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation-specific payload. Absent payloads decode as `null`.
    #[serde(default)]
    pub payload: Value,
    /// Correlation identifier.
    pub nonce: u64,
}

impl WireEnvelope {
    /// Build an envelope.
    pub fn new(kind: impl Into<String>, payload: Value, nonce: u64) -> Self {
        Self {
            kind: kind.into(),
            payload,
            nonce,
        }
    }
}

/// Serialize an envelope to its wire text.
pub fn encode(envelope: &WireEnvelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Parse wire text into an envelope.
///
/// Fails with [`CodecError::Malformed`] when the text is not a JSON object
/// or lacks a string `type` / unsigned integer `nonce`.
pub fn decode(text: &str) -> Result<WireEnvelope, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}
