//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] owns the transport and drives
//! `Disconnected -> Connecting -> Connected`, with fixed-interval reconnects
//! (`Reconnecting`) up to a capped attempt count. Lifecycle and inbound
//! traffic are republished on an [`EventBus`] of [`ConnectionEvent`]s.
//!
//! One driver task per [`connect`](ConnectionManager::connect) call owns the
//! socket. Every transition runs under a re-entrant publish gate and is
//! tagged with the epoch of the driver that produced it, so a superseded
//! driver can never publish after `disconnect()` or a newer `connect()`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use casino_core::{ClientError, EventBus, Result, WireEnvelope, decode, encode};
use casino_settings::ConnectionSettings;
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::events::{ConnectionEvent, ConnectionEventKind};
use crate::transport::{Connector, TransportFrame, TransportLink};

/// Connection state. Exactly one holds at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, no retry pending.
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting for the retry timer.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Reconnection policy and endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server URL.
    pub url: String,
    /// Retry after a failed open or a close.
    pub auto_reconnect: bool,
    /// Delay before each retry.
    pub reconnect_interval: Duration,
    /// Retries allowed before staying disconnected.
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    /// Config for `url` with the default policy.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from(&ConnectionSettings {
            url: url.into(),
            ..ConnectionSettings::default()
        })
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            auto_reconnect: settings.auto_reconnect,
            reconnect_interval: settings.reconnect_interval(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Owns the transport and the connection state machine.
///
/// Cloning is cheap and yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    events: EventBus<ConnectionEvent>,
    /// Held across every transition and its publish.
    gate: ReentrantMutex<()>,
    link: Mutex<LinkState>,
    next_nonce: AtomicU64,
    phase: watch::Sender<Phase>,
}

struct LinkState {
    status: ConnectionState,
    auto_reconnect: bool,
    attempts: u32,
    has_connected_before: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    epoch: u64,
    cancel: Option<CancellationToken>,
}

#[derive(Clone, Copy, Debug)]
struct Phase {
    state: ConnectionState,
    /// A driver task is alive (connected, opening, or waiting to retry).
    driving: bool,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (phase, _) = watch::channel(Phase {
            state: ConnectionState::Disconnected,
            driving: false,
        });
        Self {
            inner: Arc::new(Inner {
                id: Uuid::now_v7(),
                link: Mutex::new(LinkState {
                    status: ConnectionState::Disconnected,
                    auto_reconnect: config.auto_reconnect,
                    attempts: 0,
                    has_connected_before: false,
                    outbound: None,
                    epoch: 0,
                    cancel: None,
                }),
                config,
                connector,
                events: EventBus::new(),
                gate: ReentrantMutex::new(()),
                next_nonce: AtomicU64::new(1),
                phase,
            }),
        }
    }

    /// Identifier of this manager, for log correlation.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Endpoint and policy.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Lifecycle and traffic events.
    pub fn events(&self) -> &EventBus<ConnectionEvent> {
        &self.inner.events
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().status
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether any open has ever succeeded.
    pub fn has_connected_before(&self) -> bool {
        self.inner.link.lock().has_connected_before
    }

    /// Start connecting in the background.
    ///
    /// No-op while `Connected` or `Connecting`. While `Reconnecting`, the
    /// pending retry is abandoned and a fresh open starts immediately.
    /// Re-arms the configured auto-reconnect policy and resets the attempt
    /// counter.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[instrument(skip(self), fields(id = %self.inner.id, url = %self.inner.config.url))]
    pub fn connect(&self) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();
        let mut link = inner.link.lock();
        if matches!(
            link.status,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!(state = %link.status, "connect ignored");
            return;
        }

        if let Some(previous) = link.cancel.take() {
            previous.cancel();
        }
        link.epoch += 1;
        link.auto_reconnect = inner.config.auto_reconnect;
        link.attempts = 0;
        let cancel = CancellationToken::new();
        link.cancel = Some(cancel.clone());
        let epoch = link.epoch;
        inner.set_status(&mut link, ConnectionState::Connecting, true);
        drop(link);

        debug!(epoch, "connecting");
        drop(tokio::spawn(drive(Arc::clone(inner), epoch, cancel)));
    }

    /// Close the connection and stop retrying until the next
    /// [`connect`](Self::connect).
    ///
    /// Synchronous: when it returns, the state is `Disconnected` and
    /// `Disconnected` listeners (if the link was up) have run.
    #[instrument(skip(self), fields(id = %self.inner.id))]
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();
        let was_connected = {
            let mut link = inner.link.lock();
            link.auto_reconnect = false;
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
            link.epoch += 1;
            link.outbound = None;
            let was_connected = link.status == ConnectionState::Connected;
            inner.set_status(&mut link, ConnectionState::Disconnected, false);
            was_connected
        };

        if was_connected {
            info!("disconnected by client");
            let _ = inner.events.publish(&ConnectionEvent::Disconnected);
        }
    }

    /// Queue `payload` as a `kind` envelope and return its nonce.
    ///
    /// Does not wait for a response. Nonces strictly increase over the
    /// manager's whole life, across reconnects.
    pub fn send(&self, kind: &str, payload: Value) -> Result<u64> {
        let link = self.inner.link.lock();
        let outbound = match (&link.status, &link.outbound) {
            (ConnectionState::Connected, Some(outbound)) => outbound,
            _ => return Err(ClientError::NotConnected),
        };

        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let text = encode(&WireEnvelope::new(kind, payload, nonce))?;
        outbound
            .send(text)
            .map_err(|_| ClientError::NotConnected)?;
        debug!(nonce, kind, "sent");
        Ok(nonce)
    }

    /// Run `f` under the publish gate, serialized with every connection
    /// transition and its listeners. Re-entrant.
    pub(crate) fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.inner.gate.lock();
        f()
    }

    /// Wait until the state is `Connected`.
    ///
    /// Fails with [`ClientError::NotConnected`] once the manager is
    /// `Disconnected` with no driver left to retry.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut phase = self.inner.phase.subscribe();
        let state = phase
            .wait_for(|p| {
                p.state == ConnectionState::Connected
                    || (p.state == ConnectionState::Disconnected && !p.driving)
            })
            .await
            .map_err(|_| ClientError::NotConnected)?
            .state;
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.inner.id)
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_status(&self, link: &mut LinkState, status: ConnectionState, driving: bool) {
        link.status = status;
        let _ = self.phase.send_replace(Phase {
            state: status,
            driving,
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.link.lock().epoch == epoch
    }

    fn on_open(&self, epoch: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let _gate = self.gate.lock();
        let reconnect = {
            let mut link = self.link.lock();
            if link.epoch != epoch {
                return false;
            }
            link.outbound = Some(outbound);
            link.attempts = 0;
            let reconnect = link.has_connected_before;
            link.has_connected_before = true;
            self.set_status(&mut link, ConnectionState::Connected, true);
            reconnect
        };

        info!(url = %self.config.url, reconnect, "connected");
        let _ = self
            .events
            .publish(&ConnectionEvent::Connected { reconnect });
        true
    }

    fn on_open_failed(&self, epoch: u64, error: ClientError) -> bool {
        let _gate = self.gate.lock();
        {
            let mut link = self.link.lock();
            if link.epoch != epoch {
                return false;
            }
            self.set_status(&mut link, ConnectionState::Disconnected, true);
        }

        warn!(url = %self.config.url, error = %error, "connect failed");
        let _ = self.events.publish(&ConnectionEvent::Error(error));
        true
    }

    fn on_text(&self, epoch: u64, text: &str) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(epoch) {
            return false;
        }
        let event = match decode(text) {
            Ok(envelope) => {
                debug!(nonce = envelope.nonce, kind = %envelope.kind, "received");
                ConnectionEvent::Message(envelope)
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                ConnectionEvent::Error(e.into())
            }
        };
        let _ = self.events.publish(&event);
        true
    }

    fn on_fault(&self, epoch: u64, reason: String) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(epoch) {
            return false;
        }
        warn!(reason = %reason, "transport fault");
        let _ = self
            .events
            .publish(&ConnectionEvent::Error(ClientError::Transport(reason)));
        true
    }

    fn on_close(&self, epoch: u64) -> bool {
        let _gate = self.gate.lock();
        let was_connected = {
            let mut link = self.link.lock();
            if link.epoch != epoch {
                return false;
            }
            link.outbound = None;
            let was_connected = link.status == ConnectionState::Connected;
            self.set_status(&mut link, ConnectionState::Disconnected, true);
            was_connected
        };

        if was_connected {
            info!(url = %self.config.url, "connection closed");
            let _ = self.events.publish(&ConnectionEvent::Disconnected);
        }
        true
    }

    /// Move to `Reconnecting` if the policy allows another attempt.
    /// Otherwise the driver retires and the state stays `Disconnected`.
    fn schedule_retry(&self, epoch: u64) -> bool {
        let _gate = self.gate.lock();
        let attempt = {
            let mut link = self.link.lock();
            if link.epoch != epoch {
                return false;
            }
            if !link.auto_reconnect || link.attempts >= self.config.max_reconnect_attempts {
                if link.auto_reconnect {
                    warn!(
                        attempts = link.attempts,
                        "reconnect attempts exhausted, staying disconnected"
                    );
                }
                link.cancel = None;
                self.set_status(&mut link, ConnectionState::Disconnected, false);
                return false;
            }
            link.attempts += 1;
            self.set_status(&mut link, ConnectionState::Reconnecting, true);
            link.attempts
        };

        info!(
            attempt,
            max = self.config.max_reconnect_attempts,
            delay_ms = u64::try_from(self.config.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        let _ = self
            .events
            .publish(&ConnectionEvent::Reconnecting { attempt });
        true
    }

    fn begin_retry(&self, epoch: u64) -> bool {
        let _gate = self.gate.lock();
        let mut link = self.link.lock();
        if link.epoch != epoch {
            return false;
        }
        self.set_status(&mut link, ConnectionState::Connecting, true);
        true
    }
}

/// Own one connection lifecycle: open, pump frames, retry on loss.
async fn drive(inner: Arc<Inner>, epoch: u64, cancel: CancellationToken) {
    loop {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = inner.connector.open(&inner.config.url) => result,
        };

        match opened {
            Ok(TransportLink {
                outbound,
                mut inbound,
            }) => {
                if !inner.on_open(epoch, outbound) {
                    return;
                }
                loop {
                    let frame = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        frame = inbound.recv() => frame.unwrap_or(TransportFrame::Closed),
                    };
                    let current = match frame {
                        TransportFrame::Text(text) => inner.on_text(epoch, &text),
                        TransportFrame::Fault(reason) => inner.on_fault(epoch, reason),
                        TransportFrame::Closed => break,
                    };
                    if !current {
                        return;
                    }
                }
                if !inner.on_close(epoch) {
                    return;
                }
            }
            Err(error) => {
                if !inner.on_open_failed(epoch, error) {
                    return;
                }
            }
        }

        if !inner.schedule_retry(epoch) {
            return;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(inner.config.reconnect_interval) => {}
        }
        if !inner.begin_retry(epoch) {
            return;
        }
    }
}
