//! Request/response correlation over the fire-and-forget connection.
//!
//! [`RequestCorrelator::request`] sends an envelope and parks a oneshot
//! responder under the returned nonce. An inbound `Message` with the same
//! nonce settles it; a `Disconnected` event rejects every parked request.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use casino_core::{ClientError, Listener, Result, WireEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::events::{ConnectionEvent, ConnectionEventKind};
use crate::protocol::Call;

type Responder = oneshot::Sender<Result<WireEnvelope>>;

struct PendingRequest {
    kind: String,
    issued_at: Instant,
    responder: Responder,
}

/// Correlates responses with the requests that caused them.
///
/// Cloning yields another handle to the same pending map.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    connection: ConnectionManager,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    timeout: Option<Duration>,
    on_message: Listener<ConnectionEvent>,
    on_disconnect: Listener<ConnectionEvent>,
}

impl RequestCorrelator {
    /// Attach to `connection`. With `timeout`, requests that stay unanswered
    /// that long fail with [`ClientError::Timeout`].
    pub fn new(connection: ConnectionManager, timeout: Option<Duration>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CorrelatorInner>| {
            let on_message: Listener<ConnectionEvent> = {
                let weak = weak.clone();
                Arc::new(move |event: &ConnectionEvent| {
                    if let (ConnectionEvent::Message(envelope), Some(inner)) =
                        (event, weak.upgrade())
                    {
                        inner.resolve(envelope);
                    }
                })
            };
            let on_disconnect: Listener<ConnectionEvent> = {
                let weak = weak.clone();
                Arc::new(move |_: &ConnectionEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.reject_all();
                    }
                })
            };
            CorrelatorInner {
                connection,
                pending: Mutex::new(HashMap::new()),
                timeout,
                on_message,
                on_disconnect,
            }
        });

        let events = inner.connection.events();
        events.subscribe(ConnectionEventKind::Message, Arc::clone(&inner.on_message));
        events.subscribe(
            ConnectionEventKind::Disconnected,
            Arc::clone(&inner.on_disconnect),
        );

        Self { inner }
    }

    /// The connection requests travel over.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Send a `kind` request and wait for the envelope echoing its nonce.
    ///
    /// Fails immediately with [`ClientError::NotConnected`] when the
    /// connection is down, and with [`ClientError::Disconnected`] if it drops
    /// while waiting. Dropping the returned future abandons the request.
    ///
    /// # Panics
    ///
    /// Panics if the connection hands out a nonce that already has a pending
    /// request.
    pub async fn request(&self, kind: &str, payload: Value) -> Result<WireEnvelope> {
        let (responder, response) = oneshot::channel();
        let nonce = {
            // Held across send so a fast response cannot miss the entry.
            let mut pending = self.inner.pending.lock();
            let nonce = self.inner.connection.send(kind, payload)?;
            match pending.entry(nonce) {
                Entry::Occupied(_) => panic!("nonce {nonce} already has a pending request"),
                Entry::Vacant(slot) => {
                    let _ = slot.insert(PendingRequest {
                        kind: kind.to_owned(),
                        issued_at: Instant::now(),
                        responder,
                    });
                }
            }
            nonce
        };
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            nonce,
        };
        debug!(nonce, kind, "request pending");

        let settled = match self.inner.timeout {
            Some(limit) => {
                let Ok(settled) = tokio::time::timeout(limit, response).await else {
                    debug!(nonce, kind, "request timed out");
                    return Err(ClientError::Timeout {
                        nonce,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                };
                settled
            }
            None => response.await,
        };

        // responder dropped without an answer
        settled.unwrap_or(Err(ClientError::Disconnected))
    }

    /// Send a typed request and decode its typed response.
    pub async fn call<C: Call>(&self, request: &C) -> Result<C::Response> {
        let payload = serde_json::to_value(request)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        let response = self.request(C::KIND, payload).await?;
        serde_json::from_value(response.payload).map_err(|e| ClientError::UnexpectedResponse {
            kind: C::KIND.to_owned(),
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending_count())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl CorrelatorInner {
    fn resolve(&self, envelope: &WireEnvelope) {
        let Some(request) = self.pending.lock().remove(&envelope.nonce) else {
            debug!(
                nonce = envelope.nonce,
                kind = %envelope.kind,
                "no pending request for nonce, ignoring"
            );
            return;
        };
        debug!(
            nonce = envelope.nonce,
            kind = %request.kind,
            elapsed = ?request.issued_at.elapsed(),
            "request resolved"
        );
        let _ = request.responder.send(Ok(envelope.clone()));
    }

    fn reject_all(&self) {
        let drained: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, r)| r).collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "rejecting pending requests after disconnect");
        for request in drained {
            let _ = request.responder.send(Err(ClientError::Disconnected));
        }
    }
}

impl Drop for CorrelatorInner {
    fn drop(&mut self) {
        let events = self.connection.events();
        let _ = events.unsubscribe(ConnectionEventKind::Message, &self.on_message);
        let _ = events.unsubscribe(ConnectionEventKind::Disconnected, &self.on_disconnect);
    }
}

/// Removes a pending entry when its request future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<u64, PendingRequest>>,
    nonce: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.pending.lock().remove(&self.nonce);
    }
}
