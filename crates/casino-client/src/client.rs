//! The [`CasinoClient`] facade.
//!
//! Wires connection, correlator, session, data access, and the current-user
//! cache together from [`ClientSettings`], and re-publishes connection
//! lifecycle on the client-level bus as `Connect`/`Disconnect`.

use std::fmt;
use std::sync::Arc;

use casino_core::{EventBus, Listener, Result};
use casino_settings::ClientSettings;
use tracing::{info, instrument, warn};

use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::correlator::RequestCorrelator;
use crate::data::DataClient;
use crate::events::{ClientEvent, ClientEventKind, ConnectionEvent, ConnectionEventKind};
use crate::session::{Session, SessionManager};
use crate::storage::{FileTokenStore, TokenStore};
use crate::transport::{Connector, WsConnector};
use crate::user::CurrentUser;

/// High-level casino client.
pub struct CasinoClient {
    settings: ClientSettings,
    connection: ConnectionManager,
    correlator: RequestCorrelator,
    session: SessionManager,
    data: DataClient,
    current_user: CurrentUser,
    events: Arc<EventBus<ClientEvent>>,
    forwarders: Vec<(ConnectionEventKind, Listener<ConnectionEvent>)>,
}

impl CasinoClient {
    /// Assemble a client over `connector`, persisting the token in `store`.
    ///
    /// Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        settings: ClientSettings,
        connector: Arc<dyn Connector>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let connection =
            ConnectionManager::new(ConnectionConfig::from(&settings.connection), connector);
        let correlator =
            RequestCorrelator::new(connection.clone(), settings.connection.request_timeout());
        let events = Arc::new(EventBus::new());

        // Subscribed before the session so `Disconnect` precedes `AuthRevoked`.
        let forwarders = vec![
            (
                ConnectionEventKind::Connected,
                forward(&connection, &events, ConnectionEventKind::Connected, ClientEvent::Connect),
            ),
            (
                ConnectionEventKind::Disconnected,
                forward(
                    &connection,
                    &events,
                    ConnectionEventKind::Disconnected,
                    ClientEvent::Disconnect,
                ),
            ),
        ];

        let session = SessionManager::new(
            correlator.clone(),
            store,
            Arc::clone(&events),
            settings.connection.client_type.clone(),
        );
        let data = DataClient::new(correlator.clone());
        let current_user = CurrentUser::new(data.clone(), Arc::clone(&events));

        Self {
            settings,
            connection,
            correlator,
            session,
            data,
            current_user,
            events,
            forwarders,
        }
    }

    /// Client over a real WebSocket, with the token in
    /// `<data_dir>/client.json`.
    pub fn with_websocket(settings: ClientSettings) -> Self {
        let store = FileTokenStore::in_dir(&settings.storage.resolved_data_dir());
        Self::new(settings, Arc::new(WsConnector), Arc::new(store))
    }

    /// Settings the client was built from.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Connect and wait for the link. On the first connection of the
    /// client's life, also restore the session from the stored token.
    ///
    /// Fails with `NotConnected` once retries are exhausted. A failed
    /// session restore is logged and does not fail the connect.
    #[instrument(skip(self), fields(url = %self.settings.connection.url))]
    pub async fn connect(&self) -> Result<()> {
        let first = !self.connection.has_connected_before();
        self.connection.connect();
        self.connection.wait_connected().await?;

        // later connections restore through the reconnect listener
        if first {
            match self.session.resume_from_storage().await {
                Ok(true) => info!("session restored"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "session restore failed"),
            }
        }
        Ok(())
    }

    /// Close the connection. Pending requests fail and the session is
    /// revoked before this returns.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Session snapshot.
    pub fn session(&self) -> Session {
        self.session.session()
    }

    /// Authentication operations.
    pub fn auth(&self) -> &SessionManager {
        &self.session
    }

    /// Table access.
    pub fn data(&self) -> &DataClient {
        &self.data
    }

    /// Cached profile of the authenticated user.
    pub fn current_user(&self) -> &CurrentUser {
        &self.current_user
    }

    /// Underlying connection, for transport-level events.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Client-level event bus.
    pub fn events(&self) -> &Arc<EventBus<ClientEvent>> {
        &self.events
    }

    /// Register a client-level listener; keep the handle to unsubscribe.
    pub fn on<F>(&self, kind: ClientEventKind, callback: F) -> Listener<ClientEvent>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }
}

fn forward(
    connection: &ConnectionManager,
    events: &Arc<EventBus<ClientEvent>>,
    from: ConnectionEventKind,
    to: ClientEvent,
) -> Listener<ConnectionEvent> {
    let events = Arc::clone(events);
    connection.events().on(from, move |_| {
        let _ = events.publish(&to);
    })
}

impl fmt::Debug for CasinoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasinoClient")
            .field("connection", &self.connection)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Drop for CasinoClient {
    fn drop(&mut self) {
        self.connection.disconnect();
        for (kind, listener) in &self.forwarders {
            let _ = self.connection.events().unsubscribe(*kind, listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tracing::Level;

    use casino_core::ClientError;
    use casino_core::logging::capture_logs;

    use crate::storage::MemoryTokenStore;
    use crate::transport::{MemoryAcceptor, MemoryConnector};

    const ALL_KINDS: [ClientEventKind; 4] = [
        ClientEventKind::Connect,
        ClientEventKind::Disconnect,
        ClientEventKind::AuthSuccess,
        ClientEventKind::AuthRevoked,
    ];

    fn build(store: MemoryTokenStore) -> (CasinoClient, MemoryConnector, MemoryAcceptor) {
        let (connector, acceptor) = MemoryConnector::new();
        let mut settings = ClientSettings::default();
        settings.connection.url = "ws://memory/ws".into();
        let client = CasinoClient::new(settings, Arc::new(connector.clone()), Arc::new(store));
        (client, connector, acceptor)
    }

    fn record(client: &CasinoClient) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in ALL_KINDS {
            let tx = tx.clone();
            let _ = client.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn connect_without_stored_token_stays_anonymous() {
        let (client, connector, mut acceptor) = build(MemoryTokenStore::default());
        let mut events = record(&client);

        client.connect().await.unwrap();
        let _peer = acceptor.accept().await.unwrap();

        assert!(client.is_connected());
        assert_eq!(client.session(), Session::default());
        assert_eq!(drain(&mut events), vec![ClientEvent::Connect]);
        assert_eq!(connector.open_count(), 1);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn connect_restores_stored_session() {
        let (client, _connector, mut acceptor) = build(MemoryTokenStore::with_token("abc"));
        let mut events = record(&client);

        let server = tokio::spawn(async move {
            let mut peer = acceptor.accept().await.unwrap();
            let request = peer.recv().await.unwrap();
            assert_eq!(request.kind, "auth/authenticate");
            assert_eq!(request.payload["token"], "abc");
            assert!(peer.reply(
                &request,
                json!({"success": true, "userID": 7, "expiresAt": 1_999_999_999_000_i64})
            ));
            // profile fetch triggered by AuthSuccess
            let fetch = peer.recv().await.unwrap();
            assert_eq!(fetch.kind, "db/op");
            assert!(peer.reply(
                &fetch,
                json!({"result": {"ID": 7, "Username": "bob", "DisplayName": "Bob"}, "err": null})
            ));
            (peer, acceptor)
        });

        client.connect().await.unwrap();
        let session = client.session();
        assert!(session.is_authenticated);
        assert_eq!(session.subject_id, 7);

        let mut profile = client.current_user().subscribe();
        let _ = profile.wait_for(Option::is_some).await.unwrap();
        let _server = server.await.unwrap();
        assert_eq!(client.current_user().get().unwrap().username, "bob");

        let events = drain(&mut events);
        assert_eq!(
            events,
            vec![
                ClientEvent::Connect,
                ClientEvent::AuthSuccess { subject_id: 7 },
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_publishes_disconnect_then_revoked() {
        let (client, _connector, mut acceptor) = build(MemoryTokenStore::default());
        client.connect().await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        let auth = tokio::spawn({
            let session = client.auth().clone();
            async move { session.authenticate("abc").await }
        });
        let request = peer.recv().await.unwrap();
        assert!(peer.reply(
            &request,
            json!({"success": true, "userID": 7, "expiresAt": 1_999_999_999_000_i64})
        ));
        assert!(auth.await.unwrap().unwrap());

        let mut events = record(&client);
        client.disconnect();
        assert_eq!(
            drain(&mut events),
            vec![ClientEvent::Disconnect, ClientEvent::AuthRevoked]
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.current_user().get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_server_unreachable() {
        let (connector, _acceptor) = MemoryConnector::new();
        connector.refuse_all(Some("offline".into()));
        let mut settings = ClientSettings::default();
        settings.connection.max_reconnect_attempts = 2;
        let client = CasinoClient::new(
            settings,
            Arc::new(connector.clone()),
            Arc::new(MemoryTokenStore::default()),
        );

        assert_eq!(client.connect().await, Err(ClientError::NotConnected));
        assert_eq!(connector.open_count(), 3);
    }

    #[tokio::test]
    async fn connect_is_logged() {
        let (logs, _guard) = capture_logs();
        let (client, _connector, mut acceptor) = build(MemoryTokenStore::default());
        client.connect().await.unwrap();
        let _peer = acceptor.accept().await.unwrap();

        assert!(logs.has_event(Level::INFO, "connected"));
        let connected = logs
            .events()
            .into_iter()
            .find(|e| e.message == "connected")
            .unwrap();
        assert_eq!(connected.field("url"), Some("ws://memory/ws"));
        assert_eq!(connected.field("reconnect"), Some("false"));
    }

    #[tokio::test]
    async fn dropping_client_closes_link() {
        let (client, _connector, mut acceptor) = build(MemoryTokenStore::default());
        client.connect().await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        let connection = client.connection().clone();

        drop(client);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(peer.recv_text().await.is_none());
        assert_eq!(
            connection
                .events()
                .listener_count(ConnectionEventKind::Connected),
            0
        );
    }
}
