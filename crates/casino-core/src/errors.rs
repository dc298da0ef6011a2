//! Client error taxonomy.

/// Errors raised by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input was not a well-formed envelope record.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Envelope could not be serialized.
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by the connection, correlation, and session layers.
///
/// Variants carry owned strings rather than source errors so the same value
/// can be published on the event bus and handed to every rejected caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// An inbound frame failed to decode. Non-fatal; the frame is dropped.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A send or request was attempted while the connection was not established.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped before a response arrived.
    #[error("connection lost before a response arrived")]
    Disconnected,

    /// A request exceeded its configured timeout.
    #[error("request {nonce} timed out after {timeout_ms}ms")]
    Timeout {
        /// Nonce of the abandoned request.
        nonce: u64,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A response payload did not match the shape expected for its request.
    #[error("unexpected response to {kind}: {message}")]
    UnexpectedResponse {
        /// Request type the response belonged to.
        kind: String,
        /// Why the payload was rejected.
        message: String,
    },

    /// A request payload could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialization(String),

    /// Fault reported by the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Token storage failed.
    #[error("token storage error: {0}")]
    Storage(String),

    /// The server answered but reported the operation as failed.
    #[error("server error: {0}")]
    Server(String),
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(message) => Self::MalformedPacket(message),
            CodecError::Encode(source) => Self::Serialization(source.to_string()),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
