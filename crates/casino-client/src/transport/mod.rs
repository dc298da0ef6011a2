//! Transport seam between the connection manager and the socket.
//!
//! A [`Connector`] opens a [`TransportLink`]: a pair of channels carrying
//! outbound wire text and inbound [`TransportFrame`]s. Dropping the outbound
//! sender closes the underlying socket.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use casino_core::ClientError;
use tokio::sync::mpsc;

pub use memory::{MemoryAcceptor, MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// One inbound item from an open transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFrame {
    /// A text frame (or UTF-8 binary frame).
    Text(String),
    /// A transport-level fault. The link may still deliver further frames.
    Fault(String),
    /// The link closed. Nothing follows.
    Closed,
}

/// Channels of an open transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames queued for the server.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the server.
    pub inbound: mpsc::UnboundedReceiver<TransportFrame>,
}

/// Opens transports to a server URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link. Fails with [`ClientError::Transport`] when the server
    /// cannot be reached.
    async fn open(&self, url: &str) -> Result<TransportLink, ClientError>;
}
