//! Session state and the controller that logs users in and out.
//!
//! [`SessionContext`] owns the session. It is created explicitly (rehydrating
//! from storage) and shared by the HTTP client and the controller; views only
//! read it or subscribe to changes.

use std::sync::Arc;
use std::time::Duration;

use leadboard_app_state::AccessSnapshot;
use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::{broadcast, watch};

use crate::error::{ClientError, Result};
use crate::http::HttpClient;
use crate::query::QueryCache;
use crate::token_store::{AuthStateStore, MemoryAuthStore, StoredSession, TokenStore};
use crate::types::{GoogleLoginRequest, LoginResponse, UserProfile, VerifyRequest, VerifyResponse};

const EVENT_CAPACITY: usize = 16;

/// Client-side view of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    /// Always implies `access_token` and `user` are present.
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl SessionState {
    fn from_stored(stored: StoredSession) -> Self {
        let is_authenticated = stored.access_token.is_some() && stored.user.is_some();
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            user: stored.user,
            is_authenticated,
            is_loading: false,
            last_error: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    pub fn can_manage(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.can_manage)
    }

    pub fn can_view_full(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.can_view_full)
    }

    pub fn is_approved(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_approved)
    }

    pub fn access_snapshot(&self) -> AccessSnapshot {
        AccessSnapshot {
            is_loading: self.is_loading,
            is_authenticated: self.is_authenticated,
            profile_resolved: self.user.is_some(),
            is_approved: self.is_approved(),
            is_admin: self.is_admin(),
            can_manage: self.can_manage(),
        }
    }
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: i64 },
    SignedOut,
    /// The session was dropped because it could not be refreshed. Views
    /// should navigate to the login screen.
    Expired { reason: String },
}

/// Owner of the session: persisted tokens plus observable state.
pub struct SessionContext {
    tokens: TokenStore,
    /// Bumped whenever the session is replaced or dropped. Token refreshes
    /// only apply to the epoch they started in.
    epoch: Mutex<u64>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Rehydrate from `backend`.
    pub fn open(backend: Arc<dyn AuthStateStore>) -> Result<Arc<Self>> {
        let tokens = TokenStore::open(backend)?;
        let initial = SessionState::from_stored(tokens.snapshot());
        if initial.is_authenticated {
            tracing::debug!(
                user_id = initial.user.as_ref().map(|u| u.id),
                "rehydrated session from storage"
            );
        }
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Arc::new(Self {
            tokens,
            epoch: Mutex::new(0),
            state,
            events,
        }))
    }

    /// Session that lives only as long as the process.
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::open(Arc::new(MemoryAuthStore::new()))
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn begin_loading(&self) {
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.last_error = None;
        });
    }

    pub(crate) fn fail_loading(&self, message: String) {
        self.state.send_modify(|state| {
            state.is_loading = false;
            state.last_error = Some(message);
        });
    }

    pub(crate) fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    pub(crate) fn establish(&self, login: LoginResponse) {
        let user_id = login.user.id;
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        if let Err(err) =
            self.tokens
                .store_login(login.token.access_token, login.token.refresh_token, login.user)
        {
            tracing::warn!(error = %err, "failed to persist session after login");
        }
        self.sync(|state| {
            state.is_loading = false;
            state.last_error = None;
        });
        drop(epoch);
        let _ = self.events.send(SessionEvent::SignedIn { user_id });
    }

    /// Store refreshed tokens if the session is still the one of `since`.
    /// Returns `false` when a logout or new login happened in between.
    pub(crate) fn update_tokens(&self, since: u64, access: String, refresh: Option<String>) -> bool {
        let epoch = self.epoch.lock();
        if *epoch != since {
            return false;
        }
        if let Err(err) = self.tokens.set(access, refresh) {
            tracing::warn!(error = %err, "failed to persist refreshed token");
        }
        self.sync(|_| {});
        true
    }

    pub(crate) fn update_user(&self, user: UserProfile) {
        if let Err(err) = self.tokens.set_user(Some(user)) {
            tracing::warn!(error = %err, "failed to persist refreshed profile");
        }
        self.sync(|_| {});
    }

    /// Explicit sign-out. Always succeeds locally.
    pub fn clear(&self) {
        let mut epoch = self.epoch.lock();
        if self.clear_locked(&mut epoch, None) {
            let _ = self.events.send(SessionEvent::SignedOut);
        }
    }

    /// Drop a session that can no longer be refreshed, unless it was already
    /// replaced since `since`. Notifies only when there was something to
    /// drop, so repeated failures redirect once.
    pub(crate) fn expire_since(&self, since: u64, reason: impl Into<String>) -> bool {
        let mut epoch = self.epoch.lock();
        if *epoch != since {
            return false;
        }
        let reason = reason.into();
        let cleared = self.clear_locked(&mut epoch, Some(reason.clone()));
        if cleared {
            tracing::warn!(%reason, "session expired");
            let _ = self.events.send(SessionEvent::Expired { reason });
        }
        cleared
    }

    fn clear_locked(&self, epoch: &mut u64, last_error: Option<String>) -> bool {
        *epoch += 1;
        let cleared = match self.tokens.clear() {
            Ok(cleared) => cleared,
            Err(err) => {
                tracing::warn!(error = %err, "failed to clear persisted session");
                true
            }
        };
        self.state.send_modify(|state| {
            *state = SessionState {
                last_error,
                ..SessionState::default()
            };
        });
        cleared
    }

    /// Rebuild token and profile fields from the store, then apply `extra`.
    fn sync(&self, extra: impl FnOnce(&mut SessionState)) {
        let stored = self.tokens.snapshot();
        self.state.send_modify(|state| {
            let is_loading = state.is_loading;
            let last_error = state.last_error.take();
            *state = SessionState::from_stored(stored);
            state.is_loading = is_loading;
            state.last_error = last_error;
            extra(state);
        });
    }
}

/// Login, logout and profile operations.
#[derive(Clone)]
pub struct SessionController {
    http: HttpClient,
    cache: QueryCache,
    logout_timeout: Duration,
}

impl SessionController {
    pub fn new(http: HttpClient, cache: QueryCache, logout_timeout: Duration) -> Self {
        Self {
            http,
            cache,
            logout_timeout,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        self.http.session()
    }

    pub fn state(&self) -> SessionState {
        self.context().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.context().subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.context().events()
    }

    pub fn is_admin(&self) -> bool {
        self.state().is_admin()
    }

    pub fn can_manage(&self) -> bool {
        self.state().can_manage()
    }

    pub fn can_view_full(&self) -> bool {
        self.state().can_view_full()
    }

    pub fn is_approved(&self) -> bool {
        self.state().is_approved()
    }

    pub fn access_snapshot(&self) -> AccessSnapshot {
        self.state().access_snapshot()
    }

    /// Exchange an identity-provider credential for backend tokens.
    ///
    /// Concurrent calls are not deduplicated; disable the trigger while
    /// `is_loading` is set.
    pub async fn login(&self, credential: &str) -> Result<UserProfile> {
        let context = self.context();
        if credential.trim().is_empty() {
            let err = ClientError::MissingCredential(
                "No ID token received from the identity provider".to_string(),
            );
            context.fail_loading(err.user_message());
            return Err(err);
        }
        context.begin_loading();

        let request = GoogleLoginRequest {
            token: credential.to_string(),
        };
        let result = async {
            let response = self
                .http
                .send_public(Method::POST, "auth/google", |req| Ok(req.json(&request)))
                .await?;
            HttpClient::read_json::<LoginResponse>(response).await
        }
        .await;

        match result {
            Ok(login) => {
                let user = login.user.clone();
                tracing::info!(
                    user_id = user.id,
                    role = user.role.as_str(),
                    approved = user.is_approved,
                    "login succeeded"
                );
                context.establish(login);
                Ok(user)
            }
            Err(err) => {
                tracing::debug!(error = %err, "login failed");
                context.fail_loading(err.user_message());
                Err(err)
            }
        }
    }

    /// Best-effort backend logout, then unconditional local sign-out.
    pub async fn logout(&self) {
        let context = self.context();
        if let Some(token) = context.tokens().access_token() {
            let call = self
                .http
                .send_with_token(Method::POST, "auth/logout", Some(token.as_str()), Ok);
            match tokio::time::timeout(self.logout_timeout, call).await {
                Ok(Ok(_)) => tracing::debug!("backend logout acknowledged"),
                Ok(Err(err)) => tracing::warn!(error = %err, "backend logout failed"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.logout_timeout.as_millis() as u64,
                    "backend logout timed out"
                ),
            }
        }
        context.clear();
        self.cache.clear();
        tracing::info!("logged out");
    }

    /// Re-fetch the profile. Without an access token this is a no-op; on
    /// failure the existing profile is kept.
    pub async fn refresh_profile(&self) -> Result<Option<UserProfile>> {
        let context = self.context();
        if context.tokens().access_token().is_none() {
            return Ok(None);
        }
        let profile: UserProfile = self.http.get_json("auth/me", &[]).await?;
        context.update_user(profile.clone());
        Ok(Some(profile))
    }

    /// Ask the backend whether the current access token is still accepted.
    pub async fn verify_token(&self) -> Result<bool> {
        let Some(token) = self.context().tokens().access_token() else {
            return Ok(false);
        };
        let request = VerifyRequest { token: &token };
        let result = async {
            let response = self
                .http
                .send_public(Method::POST, "auth/verify", |req| Ok(req.json(&request)))
                .await?;
            HttpClient::read_json::<VerifyResponse>(response).await
        }
        .await;
        match result {
            Ok(response) => Ok(response.valid),
            Err(ClientError::Unauthorized { .. } | ClientError::Forbidden { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
