//! Session lifecycle: login, expiry checks, silent revalidation, logout, and
//! forced invalidation when the server rejects the credential.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::credentials::Credential;
use super::session::{Session, UserInfo};
use super::storage::{KeyValueStore, TOKEN_KEY};
use crate::api::{ApiError, ApiGateway, ApiRequest};
use crate::clock::Clock;
use crate::signals::{ClearReason, Signal, SignalBus, SignalKind, SubscriptionId};

const LOGIN_PATH: &str = "/auth/login";
const ME_PATH: &str = "/auth/me";
const LOGOUT_PATH: &str = "/auth/logout";

/// `Anonymous` and `Invalidated` look the same to callers; `Invalidated`
/// means a session existed and was cleared without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthState {
    Anonymous,
    Authenticating,
    Authenticated,
    Invalidated,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: i64,
    user: UserInfo,
}

#[derive(Debug)]
struct SessionState {
    state: AuthState,
    session: Option<Session>,
}

struct Inner {
    gateway: ApiGateway,
    store: Arc<dyn KeyValueStore>,
    signals: SignalBus,
    clock: Arc<dyn Clock>,
    refresh_buffer: Duration,
    state: Mutex<SessionState>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Owner of the single client session. Clone shares the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create the manager and subscribe it to `CredentialRejected` on `signals`.
    pub fn new(
        gateway: ApiGateway,
        store: Arc<dyn KeyValueStore>,
        signals: SignalBus,
        clock: Arc<dyn Clock>,
        refresh_buffer: Duration,
    ) -> Self {
        let inner = Arc::new(Inner {
            gateway,
            store,
            signals: signals.clone(),
            clock,
            refresh_buffer,
            state: Mutex::new(SessionState {
                state: AuthState::Anonymous,
                session: None,
            }),
            subscription: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let id = signals.subscribe(SignalKind::CredentialRejected, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate(ClearReason::CredentialRejected);
            }
        });
        *inner.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        Self { inner }
    }

    pub fn state(&self) -> AuthState {
        self.inner.lock_state().state
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.lock_state().session.clone()
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.inner.lock_state().session.as_ref().map(|s| s.user.clone())
    }

    /// Authenticated and not past expiry. Makes no network call.
    pub fn is_authenticated(&self) -> bool {
        let now = self.inner.clock.now();
        let st = self.inner.lock_state();
        st.state == AuthState::Authenticated
            && st.session.as_ref().map(|s| !s.is_expired(now)).unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        self.inner.lock_state().session.as_ref().map(|s| s.time_until_expiry(now))
    }

    /// Load a persisted session into memory, e.g. at startup.
    ///
    /// Returns true if a live session was restored. An expired record is
    /// cleared and leaves the manager `Invalidated`.
    pub fn restore(&self) -> bool {
        match self.inner.current_or_persisted() {
            Some(session) if session.is_expired(self.inner.clock.now()) => {
                self.inner.invalidate(ClearReason::Expired);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Exchange `credential` for a session.
    pub async fn login(&self, credential: &Credential) -> Result<Session, ApiError> {
        {
            let mut st = self.inner.lock_state();
            st.state = AuthState::Authenticating;
            st.session = None;
        }
        // Never send a stale token with the login request
        self.inner.clear_storage();
        debug!(username = %credential.username, "Logging in");

        let result = self
            .inner
            .gateway
            .post_json::<LoginResponse, _>(LOGIN_PATH, credential)
            .await
            .and_then(|response| self.inner.session_from_login(response));

        match result {
            Ok(session) => {
                if let Err(e) = session.save(self.inner.store.as_ref()) {
                    warn!(error = %e, "Failed to save session");
                }
                let mut st = self.inner.lock_state();
                st.state = AuthState::Authenticated;
                st.session = Some(session.clone());
                info!(user = %session.user.username, expires_at = %session.expires_at, "Login successful");
                Ok(session)
            }
            Err(e) => {
                {
                    let mut st = self.inner.lock_state();
                    st.state = AuthState::Anonymous;
                    st.session = None;
                }
                self.inner.clear_storage();
                error!(error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// Whether a usable session exists, revalidating it with the server
    /// when it is within the refresh buffer of expiry.
    ///
    /// With nothing in memory or storage the state is left `Anonymous`
    /// rather than moved to `Invalidated`: there was no session to clear.
    pub async fn check_auth_status(&self) -> bool {
        let now = self.inner.clock.now();
        let Some(session) = self.inner.current_or_persisted() else {
            self.inner.invalidate(ClearReason::Missing);
            return false;
        };

        if session.is_expired(now) {
            debug!(expires_at = %session.expires_at, "Session expired");
            self.inner.invalidate(ClearReason::Expired);
            return false;
        }

        if !session.needs_refresh(now, self.inner.refresh_buffer) {
            return true;
        }

        debug!(
            seconds_left = (session.expires_at - now).num_seconds(),
            "Session near expiry, revalidating"
        );
        match self.inner.gateway.get_json::<UserInfo>(ME_PATH).await {
            Ok(user) => {
                let mut st = self.inner.lock_state();
                let still_current = st
                    .session
                    .as_ref()
                    .map(|current| current.token == session.token)
                    .unwrap_or(false);
                if !still_current {
                    // Logged out or replaced while the call was in flight
                    return st.state == AuthState::Authenticated;
                }
                if let Some(current) = st.session.as_mut() {
                    current.user = user;
                    if let Err(e) = current.save(self.inner.store.as_ref()) {
                        warn!(error = %e, "Failed to save revalidated session");
                    }
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Session revalidation failed");
                self.inner.invalidate(ClearReason::RevalidationFailed);
                false
            }
        }
    }

    /// End the session. Local state is always cleared, whatever the server says.
    pub async fn logout(&self) {
        let had_session = {
            let mut st = self.inner.lock_state();
            st.state = AuthState::Anonymous;
            st.session.take().is_some()
        };

        let has_token = matches!(self.inner.store.get(TOKEN_KEY), Ok(Some(_)));
        if had_session || has_token {
            match self.inner.gateway.call(ApiRequest::post(LOGOUT_PATH)).await {
                Ok(_) => debug!("Remote logout acknowledged"),
                Err(e) => warn!(error = %e, "Remote logout failed, clearing local session anyway"),
            }
        }

        self.inner.clear_storage();
        self.inner.lock_state().state = AuthState::Anonymous;
        info!("Logged out");
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session_from_login(&self, response: LoginResponse) -> Result<Session, ApiError> {
        if let Some(ref kind) = response.token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                warn!(token_type = %kind, "Unexpected token type in login response");
            }
        }
        let now = self.clock.now();
        Duration::try_seconds(response.expires_in)
            .and_then(|expires_in| Session::new(response.access_token, response.user, now, expires_in))
            .ok_or_else(|| {
                ApiError::request(format!(
                    "Login response has non-positive expires_in ({})",
                    response.expires_in
                ))
            })
    }

    /// In-memory session, falling back to storage. A persisted session is
    /// adopted as `Authenticated`.
    fn current_or_persisted(&self) -> Option<Session> {
        if let Some(session) = self.lock_state().session.clone() {
            return Some(session);
        }
        let loaded = match Session::load(self.store.as_ref()) {
            Ok(loaded) => loaded?,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                return None;
            }
        };
        let mut st = self.lock_state();
        if st.state == AuthState::Authenticating {
            return None;
        }
        st.state = AuthState::Authenticated;
        st.session = Some(loaded.clone());
        debug!(user = %loaded.user.username, "Restored persisted session");
        Some(loaded)
    }

    fn clear_storage(&self) {
        if let Err(e) = Session::clear(self.store.as_ref()) {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    /// Local cleanup without a remote call. Publishes `SessionCleared` only
    /// if a session was actually held.
    fn invalidate(&self, reason: ClearReason) {
        let was_held = {
            let mut st = self.lock_state();
            let held = st.session.take().is_some() || st.state == AuthState::Authenticated;
            if held {
                st.state = AuthState::Invalidated;
            }
            held
        };

        self.clear_storage();

        if was_held {
            info!(reason = ?reason, "Session cleared");
            self.signals.publish(Signal::SessionCleared { reason });
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let id = self.subscription.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(id) = id {
            self.signals.unsubscribe(id);
        }
    }
}
