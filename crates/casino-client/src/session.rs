//! Authentication lifecycle bound to the connection lifecycle.
//!
//! A [`Session`] is only ever authenticated while the connection that proved
//! it is up: every `Disconnected` event revokes it synchronously, and every
//! reconnect tries to restore it from the stored token.
//!
//! Session commits and revocations run under the connection's publish gate,
//! so `AuthSuccess`/`AuthRevoked` are ordered with `Connected`/`Disconnected`.

use std::fmt;
use std::sync::{Arc, Weak};

use casino_core::{ClientError, EventBus, Listener, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::correlator::RequestCorrelator;
use crate::events::{ClientEvent, ConnectionEvent, ConnectionEventKind};
use crate::protocol::{AuthenticateRequest, DoesUserExistRequest, LoginRequest, RegisterRequest};
use crate::storage::TokenStore;

/// The client's belief about whether, and as whom, it is authenticated.
///
/// The default value is the unauthenticated sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Whether a server round-trip has accepted the token.
    pub is_authenticated: bool,
    /// Authenticated user id, `0` when unauthenticated.
    pub subject_id: u64,
    /// Session expiry, the Unix epoch when unauthenticated.
    pub expires_at: DateTime<Utc>,
    /// Accepted token, `None` when unauthenticated.
    pub token: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            is_authenticated: false,
            subject_id: 0,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            token: None,
        }
    }
}

/// Result of [`SessionManager::register`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// Registered and authenticated.
    pub success: bool,
    /// The username was already taken.
    pub user_already_taken: bool,
}

/// Result of [`SessionManager::login`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Logged in and authenticated.
    pub success: bool,
    /// No user with that name.
    pub user_not_found: bool,
    /// The password did not match.
    pub wrong_password: bool,
}

/// Owns the [`Session`].
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    correlator: RequestCorrelator,
    store: Arc<dyn TokenStore>,
    events: Arc<EventBus<ClientEvent>>,
    session: Mutex<Session>,
    client_type: String,
    on_connected: Listener<ConnectionEvent>,
    on_disconnected: Listener<ConnectionEvent>,
}

impl SessionManager {
    /// Bind a session to the correlator's connection. Auth events are
    /// published on `events`.
    pub fn new(
        correlator: RequestCorrelator,
        store: Arc<dyn TokenStore>,
        events: Arc<EventBus<ClientEvent>>,
        client_type: impl Into<String>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let on_connected: Listener<ConnectionEvent> = {
                let weak = weak.clone();
                Arc::new(move |event: &ConnectionEvent| {
                    let ConnectionEvent::Connected { reconnect: true } = event else {
                        return;
                    };
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.resume_after_reconnect();
                    }
                })
            };
            let on_disconnected: Listener<ConnectionEvent> = {
                let weak = weak.clone();
                Arc::new(move |_: &ConnectionEvent| {
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.revoke();
                    }
                })
            };
            SessionInner {
                correlator,
                store,
                events,
                session: Mutex::new(Session::default()),
                client_type: client_type.into(),
                on_connected,
                on_disconnected,
            }
        });

        let connection_events = inner.correlator.connection().events();
        connection_events.subscribe(
            ConnectionEventKind::Connected,
            Arc::clone(&inner.on_connected),
        );
        connection_events.subscribe(
            ConnectionEventKind::Disconnected,
            Arc::clone(&inner.on_disconnected),
        );

        Self { inner }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.session.lock().clone()
    }

    /// Whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.inner.session.lock().is_authenticated
    }

    /// Bus carrying `AuthSuccess`/`AuthRevoked`.
    pub fn events(&self) -> &Arc<EventBus<ClientEvent>> {
        &self.inner.events
    }

    /// Create an account and, when the server hands back a token, sign in
    /// with it.
    #[instrument(skip(self, password, display_name))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> Result<RegisterOutcome> {
        let response = self
            .inner
            .correlator
            .call(&RegisterRequest {
                username: username.to_owned(),
                password: password.to_owned(),
                display_name: display_name.to_owned(),
            })
            .await?;

        if !response.status.success {
            info!(status = %response.status.status, "registration refused");
            return Ok(RegisterOutcome {
                success: false,
                user_already_taken: response.user_already_exists,
            });
        }

        Ok(RegisterOutcome {
            success: self.authenticate_issued(response.token).await?,
            user_already_taken: false,
        })
    }

    /// Sign in with credentials and authenticate with the issued token.
    ///
    /// A refused login leaves any current session as it was: the server only
    /// changes who the connection speaks for on `auth/authenticate`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let response = self
            .inner
            .correlator
            .call(&LoginRequest {
                username: username.to_owned(),
                password: password.to_owned(),
            })
            .await?;

        if !response.status.success {
            info!(status = %response.status.status, "login refused");
            return Ok(LoginOutcome {
                success: false,
                user_not_found: response.user_does_not_exist,
                wrong_password: response.wrong_password,
            });
        }

        Ok(LoginOutcome {
            success: self.authenticate_issued(response.token).await?,
            ..LoginOutcome::default()
        })
    }

    async fn authenticate_issued(&self, token: Option<String>) -> Result<bool> {
        match token {
            Some(token) => self.authenticate(&token).await,
            None => {
                warn!("server reported success without issuing a token");
                Ok(false)
            }
        }
    }

    /// Prove `token` to the server and establish the session.
    ///
    /// `Ok(false)` when the server rejects the token, which also forgets the
    /// stored copy. Any failure leaves the session fully revoked.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: &str) -> Result<bool> {
        let request = AuthenticateRequest {
            token: token.to_owned(),
            client_type: self.inner.client_type.clone(),
        };
        let response = match self.inner.correlator.call(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "authenticate request failed");
                self.revoke();
                return Err(e);
            }
        };

        if !response.status.success {
            info!(status = %response.status.status, "token rejected");
            self.revoke();
            if let Err(e) = self.inner.store.clear() {
                warn!(error = %e, "failed to clear rejected token");
            }
            return Ok(false);
        }

        let subject_id = response.user_id;
        let expires_at = DateTime::from_timestamp_millis(response.expires_at).unwrap_or_default();
        let connection = self.inner.correlator.connection();
        let committed = connection.serialized(|| {
            if !connection.is_connected() {
                return false;
            }
            *self.inner.session.lock() = Session {
                is_authenticated: true,
                subject_id,
                expires_at,
                token: Some(token.to_owned()),
            };
            info!(subject_id, %expires_at, "authenticated");
            let _ = self
                .inner
                .events
                .publish(&ClientEvent::AuthSuccess { subject_id });
            true
        });
        if !committed {
            debug!("connection dropped before the session was committed");
            self.revoke();
            return Err(ClientError::Disconnected);
        }

        if let Err(e) = self.inner.store.save(token) {
            warn!(error = %e, "failed to persist session token");
        }
        Ok(true)
    }

    /// Reset the session to the unauthenticated sentinel.
    ///
    /// Publishes `AuthRevoked` only when the session was authenticated.
    pub fn revoke(&self) {
        self.inner.correlator.connection().serialized(|| {
            let was_authenticated = {
                let mut session = self.inner.session.lock();
                let was_authenticated = session.is_authenticated;
                *session = Session::default();
                was_authenticated
            };
            if was_authenticated {
                info!("session revoked");
                let _ = self.inner.events.publish(&ClientEvent::AuthRevoked);
            }
        });
    }

    /// Authenticate with the stored token, if there is one.
    ///
    /// `Ok(false)` without any request when nothing is stored.
    pub async fn resume_from_storage(&self) -> Result<bool> {
        let Some(token) = self.inner.store.load()? else {
            debug!("no stored token");
            return Ok(false);
        };
        self.authenticate(&token).await
    }

    /// Whether `username` is registered.
    pub async fn does_user_exist(&self, username: &str) -> Result<bool> {
        let response = self
            .inner
            .correlator
            .call(&DoesUserExistRequest {
                username: username.to_owned(),
            })
            .await?;
        Ok(response.user_exists)
    }

    /// Revoke the session and forget the stored token.
    pub fn logout(&self) -> Result<()> {
        self.revoke();
        self.inner.store.clear()?;
        Ok(())
    }

    fn resume_after_reconnect(self) {
        if self.is_authenticated() {
            return;
        }
        drop(tokio::spawn(async move {
            match self.resume_from_storage().await {
                Ok(true) => info!("session restored after reconnect"),
                Ok(false) => debug!("session not restored after reconnect"),
                Err(e) => warn!(error = %e, "session restore after reconnect failed"),
            }
        }));
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.session())
            .field("client_type", &self.inner.client_type)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let events = self.correlator.connection().events();
        let _ = events.unsubscribe(ConnectionEventKind::Connected, &self.on_connected);
        let _ = events.unsubscribe(ConnectionEventKind::Disconnected, &self.on_disconnected);
    }
}
