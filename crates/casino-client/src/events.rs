//! Events published by the connection and client layers.

use casino_core::{BusEvent, ClientError, WireEnvelope};

/// Transport-level lifecycle and traffic.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The transport opened. `reconnect` is false only for the first open of
    /// the manager's life.
    Connected {
        /// Whether an earlier connection had already been established.
        reconnect: bool,
    },
    /// A previously established connection closed.
    Disconnected,
    /// A well-formed inbound envelope.
    Message(WireEnvelope),
    /// Non-fatal fault: failed open, transport error, or malformed frame.
    Error(ClientError),
    /// A retry was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
}

/// Names of [`ConnectionEvent`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    /// [`ConnectionEvent::Connected`]
    Connected,
    /// [`ConnectionEvent::Disconnected`]
    Disconnected,
    /// [`ConnectionEvent::Message`]
    Message,
    /// [`ConnectionEvent::Error`]
    Error,
    /// [`ConnectionEvent::Reconnecting`]
    Reconnecting,
}

impl BusEvent for ConnectionEvent {
    type Name = ConnectionEventKind;

    fn name(&self) -> ConnectionEventKind {
        match self {
            Self::Connected { .. } => ConnectionEventKind::Connected,
            Self::Disconnected => ConnectionEventKind::Disconnected,
            Self::Message(_) => ConnectionEventKind::Message,
            Self::Error(_) => ConnectionEventKind::Error,
            Self::Reconnecting { .. } => ConnectionEventKind::Reconnecting,
        }
    }
}

/// Client-level events derived from the connection and session layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection was established (first time or after a reconnect).
    Connect,
    /// The connection was lost or closed.
    Disconnect,
    /// A session was established for `subject_id`.
    AuthSuccess {
        /// Authenticated user id.
        subject_id: u64,
    },
    /// An authenticated session ended.
    AuthRevoked,
}

/// Names of [`ClientEvent`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// [`ClientEvent::Connect`]
    Connect,
    /// [`ClientEvent::Disconnect`]
    Disconnect,
    /// [`ClientEvent::AuthSuccess`]
    AuthSuccess,
    /// [`ClientEvent::AuthRevoked`]
    AuthRevoked,
}

impl BusEvent for ClientEvent {
    type Name = ClientEventKind;

    fn name(&self) -> ClientEventKind {
        match self {
            Self::Connect => ClientEventKind::Connect,
            Self::Disconnect => ClientEventKind::Disconnect,
            Self::AuthSuccess { .. } => ClientEventKind::AuthSuccess,
            Self::AuthRevoked => ClientEventKind::AuthRevoked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_event_names() {
        assert_eq!(
            ConnectionEvent::Connected { reconnect: true }.name(),
            ConnectionEventKind::Connected
        );
        assert_eq!(
            ConnectionEvent::Reconnecting { attempt: 2 }.name(),
            ConnectionEventKind::Reconnecting
        );
        assert_eq!(
            ConnectionEvent::Error(ClientError::NotConnected).name(),
            ConnectionEventKind::Error
        );
    }

    #[test]
    fn client_event_names() {
        assert_eq!(
            ClientEvent::AuthSuccess { subject_id: 7 }.name(),
            ClientEventKind::AuthSuccess
        );
        assert_eq!(ClientEvent::AuthRevoked.name(), ClientEventKind::AuthRevoked);
    }
}
