//! Scripted in-process transport.
//!
//! [`MemoryConnector`] hands every successful open to a [`MemoryAcceptor`] as
//! a [`MemoryPeer`], which plays the server side of the link. Opens can be
//! scripted to fail, which drives the reconnect path without real sockets.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use casino_core::{ClientError, WireEnvelope, decode, encode};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connector, TransportFrame, TransportLink};

/// In-process [`Connector`].
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Script>>,
}

struct Script {
    failures: VecDeque<String>,
    refuse: Option<String>,
    opens: u32,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the acceptor receiving its peers.
    pub fn new() -> (Self, MemoryAcceptor) {
        let (accepted, peers) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(Mutex::new(Script {
                failures: VecDeque::new(),
                refuse: None,
                opens: 0,
                accepted,
            })),
        };
        (connector, MemoryAcceptor { peers })
    }

    /// Fail the next open with `reason`. Queued failures are consumed in order.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.shared.lock().failures.push_back(reason.into());
    }

    /// Fail every open with `reason` until called again with `None`.
    pub fn refuse_all(&self, reason: Option<String>) {
        self.shared.lock().refuse = reason;
    }

    /// Number of opens attempted so far.
    pub fn open_count(&self) -> u32 {
        self.shared.lock().opens
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, ClientError> {
        let mut script = self.shared.lock();
        script.opens += 1;
        if let Some(reason) = script.failures.pop_front().or_else(|| script.refuse.clone()) {
            return Err(ClientError::Transport(reason));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_owned(),
            from_client,
            to_client,
        };
        script
            .accepted
            .send(peer)
            .map_err(|_| ClientError::Transport("connection refused".into()))?;

        Ok(TransportLink { outbound, inbound })
    }
}

/// Receives the server side of each opened link.
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// Wait for the next opened link. `None` once the connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Server side of an in-memory link.
///
/// Dropping the peer closes the link from the server side.
pub struct MemoryPeer {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<TransportFrame>,
}

impl MemoryPeer {
    /// URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next raw frame sent by the client. `None` once the client dropped the link.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame sent by the client, decoded. Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<WireEnvelope> {
        loop {
            let text = self.recv_text().await?;
            if let Ok(envelope) = decode(&text) {
                return Some(envelope);
            }
        }
    }

    /// Deliver raw text to the client. Returns `false` if the client is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(TransportFrame::Text(text.into())).is_ok()
    }

    /// Deliver an envelope to the client.
    pub fn send(&self, envelope: &WireEnvelope) -> bool {
        encode(envelope).is_ok_and(|text| self.send_text(text))
    }

    /// Answer `request` with `payload`, echoing its nonce.
    pub fn reply(&self, request: &WireEnvelope, payload: Value) -> bool {
        let kind = format!("{}:res", request.kind);
        self.send(&WireEnvelope::new(kind, payload, request.nonce))
    }

    /// Report a transport fault without closing.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        self.to_client.send(TransportFrame::Fault(reason.into())).is_ok()
    }

    /// Close the link from the server side.
    pub fn close(self) {
        let _ = self.to_client.send(TransportFrame::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn open_hands_peer_to_acceptor() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let mut link = connector.open("ws://memory/ws").await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.url(), "ws://memory/ws");

        link.outbound.send(r#"{"type":"ping","payload":null,"nonce":1}"#.into()).unwrap();
        let request = peer.recv().await.unwrap();
        assert_eq!(request.kind, "ping");

        assert!(peer.reply(&request, json!({"ok": true})));
        let frame = link.inbound.recv().await.unwrap();
        let TransportFrame::Text(text) = frame else {
            panic!("expected text, got {frame:?}");
        };
        let response = decode(&text).unwrap();
        assert_eq!(response.kind, "ping:res");
        assert_eq!(response.nonce, 1);
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let (connector, _acceptor) = MemoryConnector::new();
        connector.fail_next("down");
        assert_matches!(
            connector.open("ws://memory").await,
            Err(ClientError::Transport(reason)) if reason == "down"
        );
        assert!(connector.open("ws://memory").await.is_ok());
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test]
    async fn refuse_all_until_cleared() {
        let (connector, _acceptor) = MemoryConnector::new();
        connector.refuse_all(Some("offline".into()));
        assert!(connector.open("ws://memory").await.is_err());
        assert!(connector.open("ws://memory").await.is_err());
        connector.refuse_all(None);
        assert!(connector.open("ws://memory").await.is_ok());
    }

    #[tokio::test]
    async fn dropped_acceptor_refuses() {
        let (connector, acceptor) = MemoryConnector::new();
        drop(acceptor);
        assert!(connector.open("ws://memory").await.is_err());
    }

    #[tokio::test]
    async fn close_and_drop_end_the_link() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let mut link = connector.open("ws://memory").await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        peer.close();
        assert_eq!(link.inbound.recv().await, Some(TransportFrame::Closed));
        assert_eq!(link.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn peer_sees_client_drop() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let link = connector.open("ws://memory").await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        drop(link);
        assert!(peer.recv_text().await.is_none());
    }
}
