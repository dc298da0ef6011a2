//! Cached profile of the authenticated user.
//!
//! The cache follows the session: `AuthSuccess` triggers a background fetch
//! of the subject's `users` row, `AuthRevoked` clears it. A fetch that
//! completes after the session it was started for has ended is discarded.

use std::fmt;
use std::sync::{Arc, Weak};

use casino_core::{ClientError, EventBus, Listener, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::data::DataClient;
use crate::events::{ClientEvent, ClientEventKind};

/// Table holding user rows.
pub const USERS_TABLE: &str = "users";

/// Public view of a user row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserProfile {
    /// Row id.
    #[serde(rename = "ID")]
    pub id: u64,
    /// Login name.
    pub username: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Join time as formatted by the server.
    #[serde(default)]
    pub joined_at: String,
    /// Administrator flag.
    #[serde(default)]
    pub is_admin: bool,
    /// Wallet, when the server includes it.
    #[serde(default)]
    pub wallet: Option<WalletSummary>,
}

/// Wallet fields carried on a user row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WalletSummary {
    /// Owning user.
    #[serde(rename = "UserID")]
    pub user_id: u64,
    /// Balance in cents.
    pub networth_cents: u64,
    /// Whether the sign-up bonus was paid out.
    pub received_starting_bonus: bool,
}

/// Session-scoped cache of the current [`UserProfile`].
#[derive(Clone)]
pub struct CurrentUser {
    inner: Arc<CurrentUserInner>,
}

struct CurrentUserInner {
    data: DataClient,
    events: Arc<EventBus<ClientEvent>>,
    tracked: Mutex<Tracked>,
    profile: watch::Sender<Option<UserProfile>>,
    on_auth: Listener<ClientEvent>,
    on_revoked: Listener<ClientEvent>,
}

#[derive(Clone, Copy, Debug, Default)]
struct Tracked {
    subject_id: Option<u64>,
    /// Bumped on every session change; fetches carry the value they started with.
    epoch: u64,
}

impl CurrentUser {
    /// Follow the session through `events`, fetching rows with `data`.
    pub fn new(data: DataClient, events: Arc<EventBus<ClientEvent>>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CurrentUserInner>| {
            let on_auth: Listener<ClientEvent> = {
                let weak = weak.clone();
                Arc::new(move |event: &ClientEvent| {
                    let ClientEvent::AuthSuccess { subject_id } = *event else {
                        return;
                    };
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.track(subject_id);
                    }
                })
            };
            let on_revoked: Listener<ClientEvent> = {
                let weak = weak.clone();
                Arc::new(move |_: &ClientEvent| {
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.invalidate();
                    }
                })
            };
            let (profile, _) = watch::channel(None);
            CurrentUserInner {
                data,
                events,
                tracked: Mutex::new(Tracked::default()),
                profile,
                on_auth,
                on_revoked,
            }
        });

        inner
            .events
            .subscribe(ClientEventKind::AuthSuccess, Arc::clone(&inner.on_auth));
        inner
            .events
            .subscribe(ClientEventKind::AuthRevoked, Arc::clone(&inner.on_revoked));

        Self { inner }
    }

    /// Cached profile, `None` when unauthenticated or not fetched yet.
    pub fn get(&self) -> Option<UserProfile> {
        self.inner.profile.borrow().clone()
    }

    /// Observe profile changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<UserProfile>> {
        self.inner.profile.subscribe()
    }

    /// Authenticated subject the cache follows.
    pub fn subject_id(&self) -> Option<u64> {
        self.inner.tracked.lock().subject_id
    }

    /// Fetch the subject's row and replace the cached profile.
    ///
    /// `Ok(None)` when unauthenticated, or when the session changed while
    /// the fetch was in flight.
    pub async fn refresh(&self) -> Result<Option<UserProfile>> {
        let Tracked { subject_id, epoch } = *self.inner.tracked.lock();
        let Some(subject_id) = subject_id else {
            return Ok(None);
        };

        let response = self.inner.data.find_by_id(USERS_TABLE, subject_id).await?;
        if let Some(err) = response.error() {
            return Err(ClientError::Server(err));
        }
        let profile: UserProfile =
            serde_json::from_value(response.result).map_err(|e| {
                ClientError::UnexpectedResponse {
                    kind: "db/op".to_owned(),
                    message: e.to_string(),
                }
            })?;

        let tracked = self.inner.tracked.lock();
        if tracked.epoch != epoch {
            debug!(subject_id, "session changed during profile fetch, discarding");
            return Ok(None);
        }
        let _ = self.inner.profile.send_replace(Some(profile.clone()));
        drop(tracked);
        debug!(subject_id, username = %profile.username, "profile refreshed");
        Ok(Some(profile))
    }

    /// Change the current user's display name and update the cache.
    pub async fn update_display_name(&self, display_name: &str) -> Result<()> {
        let Some(subject_id) = self.subject_id() else {
            return Err(ClientError::Server("not authenticated".to_owned()));
        };
        let response = self
            .inner
            .data
            .update(USERS_TABLE, subject_id, json!({ "DisplayName": display_name }))
            .await?;
        if let Some(err) = response.error() {
            return Err(ClientError::Server(err));
        }

        let _ = self.inner.profile.send_if_modified(|profile| match profile {
            Some(profile) if profile.id == subject_id => {
                display_name.clone_into(&mut profile.display_name);
                true
            }
            _ => false,
        });
        info!(subject_id, "display name updated");
        Ok(())
    }

    fn track(self, subject_id: u64) {
        {
            let mut tracked = self.inner.tracked.lock();
            tracked.epoch += 1;
            if tracked.subject_id != Some(subject_id) {
                let _ = self.inner.profile.send_replace(None);
            }
            tracked.subject_id = Some(subject_id);
        }
        drop(tokio::spawn(async move {
            if let Err(e) = self.refresh().await {
                warn!(subject_id, error = %e, "failed to load current user");
            }
        }));
    }

    fn invalidate(&self) {
        let mut tracked = self.inner.tracked.lock();
        tracked.epoch += 1;
        tracked.subject_id = None;
        let _ = self.inner.profile.send_replace(None);
    }
}

impl fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentUser")
            .field("subject_id", &self.subject_id())
            .field("profile", &self.get())
            .finish_non_exhaustive()
    }
}

impl Drop for CurrentUserInner {
    fn drop(&mut self) {
        let _ = self
            .events
            .unsubscribe(ClientEventKind::AuthSuccess, &self.on_auth);
        let _ = self
            .events
            .unsubscribe(ClientEventKind::AuthRevoked, &self.on_revoked);
    }
}
