//! The single owner of the client's authentication session.
//!
//! [`SessionManager`] holds the current [`Session`] and the [`UserProfile`]
//! derived from it, publishes every change on a `watch` channel, and keeps
//! the token valid: proactively through a background schedule and reactively
//! when a request comes back 401. Refreshes are single-flight: callers that
//! queue behind an in-flight refresh receive its result instead of issuing
//! their own.
//!
//! A refresh failure is fatal for the session (forced logout). Logout always
//! clears local state, whatever the backend says.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use hostel_core::error::{HostelError, Result};
use hostel_core::models::{ApiResponse, Session, UserProfile};
use hostel_core::session_store::SessionStore;
use hostel_core::validation::{validate_credentials, SignupRequest};
use hostel_data::auth_backend::{AuthBackend, LoginOutcome};
use hostel_data::realtime::TokenSource;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use hostel_core::clock::{Clock, SystemClock};
use crate::policy::RefreshPolicy;
use crate::refresh_scheduler;

// ── AuthState ─────────────────────────────────────────────────────────────────

/// Snapshot of the authentication state published to subscribers.
///
/// `generation` increases every time the session is replaced or cleared;
/// profile changes alone do not bump it.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub session: Option<Session>,
    pub profile: Option<UserProfile>,
    pub generation: u64,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct SessionManagerBuilder {
    backend: Arc<dyn AuthBackend>,
    store: Option<SessionStore>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
}

impl SessionManagerBuilder {
    /// Persist the session here and restore it on [`SessionManager::init`].
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        let (state, _) = watch::channel(AuthState::default());
        Arc::new_cyclic(|me| SessionManager {
            me: me.clone(),
            backend: self.backend,
            store: self.store,
            clock: self.clock,
            policy: self.policy,
            state,
            refresh_gate: tokio::sync::Mutex::new(()),
            transition: Mutex::new(()),
            scheduler: Mutex::new(None),
        })
    }
}

// ── SessionManager ────────────────────────────────────────────────────────────

pub struct SessionManager {
    me: Weak<SessionManager>,
    backend: Arc<dyn AuthBackend>,
    store: Option<SessionStore>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    state: watch::Sender<AuthState>,
    refresh_gate: tokio::sync::Mutex<()>,
    /// Serializes session replacement and clearing together with the
    /// matching write to the store.
    transition: Mutex<()>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn builder(backend: Arc<dyn AuthBackend>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            backend,
            store: None,
            clock: Arc::new(SystemClock),
            policy: RefreshPolicy::default(),
        }
    }

    // ── Observation ───────────────────────────────────────────────────────

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn snapshot(&self) -> (Option<Session>, u64) {
        let state = self.state.borrow();
        (state.session.clone(), state.generation)
    }

    fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Restore a persisted session.
    ///
    /// An expired session is refreshed right away; if that fails it is
    /// discarded. Returns whether a session is active afterwards.
    pub async fn init(&self) -> bool {
        let Some(session) = self.store.as_ref().and_then(SessionStore::load) else {
            tracing::debug!("no stored session");
            return false;
        };

        tracing::info!(user_id = %session.user_id, "restoring stored session");
        let generation = self.install(session.clone(), None);

        let session = if session.is_expired(self.clock.now()) {
            match self.refresh_from(generation).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::info!(error = %e, "stored session could not be renewed");
                    return false;
                }
            }
        } else {
            session
        };

        self.load_profile(&session).await;
        self.schedule_proactive_refresh();
        self.is_authenticated()
    }

    /// Sign in with email and password.
    ///
    /// On success the session is stored, the profile is taken from the login
    /// payload or looked up, and the proactive refresh is armed.
    pub async fn login(&self, email: &str, password: &str) -> ApiResponse<()> {
        if let Err(e) = validate_credentials(email, password) {
            return ApiResponse::fail(e.to_string());
        }

        let LoginOutcome { session, profile } = match self.backend.login(email, password).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "login failed");
                return ApiResponse::fail(e.to_string());
            }
        };

        tracing::info!(user_id = %session.user_id, "signed in");
        let embedded = profile.is_some();
        self.install(session.clone(), profile);
        if !embedded {
            self.load_profile(&session).await;
        }
        self.schedule_proactive_refresh();
        ApiResponse::ok(())
    }

    /// Register a new account. Does not sign in.
    pub async fn signup(&self, request: SignupRequest) -> ApiResponse<()> {
        if let Err(e) = request.validate() {
            return ApiResponse::fail(e.to_string());
        }
        let result = self.backend.signup(&request).await;
        match &result {
            Ok(()) => tracing::info!(role = %request.role, "signup accepted"),
            Err(e) => tracing::warn!(error = %e, "signup rejected"),
        }
        result.into()
    }

    /// Best-effort backend logout, then unconditionally clear local state.
    pub async fn logout(&self) {
        if let Some(session) = self.session() {
            let call = self.backend.logout(&session.access_token);
            match tokio::time::timeout(self.policy.logout_timeout, call).await {
                Ok(Ok(())) => tracing::debug!("backend logout acknowledged"),
                Ok(Err(e)) => tracing::warn!(error = %e, "backend logout failed; clearing local session anyway"),
                Err(_) => tracing::warn!(
                    timeout_secs = self.policy.logout_timeout.as_secs(),
                    "backend logout timed out; clearing local session anyway"
                ),
            }
        }
        self.clear();
        self.stop_scheduler();
        tracing::info!("signed out");
    }

    /// Stop background work without touching the session.
    pub fn teardown(&self) {
        self.stop_scheduler();
    }

    // ── Tokens ────────────────────────────────────────────────────────────

    /// Bearer token for an outbound call, refreshed first when it is within
    /// the safety margin of expiry.
    pub async fn access_token(&self) -> Result<String> {
        let (session, generation) = self.snapshot();
        let session = session.ok_or(HostelError::NoSession)?;
        if self.policy.session_is_due(&session, self.clock.now()) {
            tracing::debug!("access token near expiry; refreshing first");
            return self.refresh_from(generation).await.map(|s| s.access_token);
        }
        Ok(session.access_token)
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh(&self) -> Result<Session> {
        self.refresh_from(self.generation()).await
    }

    /// Reactive refresh after the server rejected `rejected_token`.
    ///
    /// If the session already moved on (another caller refreshed), the
    /// current token is returned without a new refresh.
    pub async fn refresh_after_unauthorized(&self, rejected_token: &str) -> Result<String> {
        let (session, generation) = self.snapshot();
        let session = session.ok_or(HostelError::SessionEnded)?;
        if session.access_token != rejected_token {
            return Ok(session.access_token);
        }
        self.refresh_from(generation).await.map(|s| s.access_token)
    }

    /// Single-flight refresh of the session observed at `seen_generation`.
    pub(crate) async fn refresh_from(&self, seen_generation: u64) -> Result<Session> {
        let _gate = self.refresh_gate.lock().await;

        let (current, generation) = self.snapshot();
        if generation != seen_generation {
            // Someone refreshed, signed in or signed out while we queued.
            return current.ok_or(HostelError::SessionEnded);
        }
        let current = current.ok_or(HostelError::NoSession)?;

        match self.backend.refresh(&current).await {
            Ok(session) => {
                if self.replace_if_current(generation, session.clone()).is_none() {
                    tracing::debug!("session changed during refresh; discarding result");
                    return Err(HostelError::SessionEnded);
                }
                tracing::info!(user_id = %session.user_id, expires_at = %session.expires_at, "session refreshed");
                Ok(session)
            }
            Err(e) => {
                if !self.clear_if_current(generation) {
                    tracing::debug!(error = %e, "session changed during failed refresh");
                    return Err(HostelError::SessionEnded);
                }
                tracing::warn!(error = %e, "token refresh failed; signing out");
                Err(e)
            }
        }
    }

    // ── Profile ───────────────────────────────────────────────────────────

    /// Look up the profile of the signed-in user.
    ///
    /// Failures are logged and leave the profile unset.
    pub async fn fetch_profile(&self) -> Option<UserProfile> {
        let session = self.session()?;
        self.load_profile(&session).await
    }

    async fn load_profile(&self, session: &Session) -> Option<UserProfile> {
        let profile = match self
            .backend
            .fetch_profile(&session.access_token, &session.user_id)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!(user_id = %session.user_id, "no profile found for user");
                return None;
            }
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, error = %e, "profile lookup failed");
                return None;
            }
        };

        let stored = self.state.send_if_modified(|state| {
            let same_user = state
                .session
                .as_ref()
                .is_some_and(|s| s.user_id == session.user_id);
            if same_user {
                state.profile = Some(profile.clone());
            }
            same_user
        });
        if !stored {
            tracing::debug!("session changed during profile lookup; discarding profile");
            return None;
        }
        Some(profile)
    }

    // ── Proactive refresh ─────────────────────────────────────────────────

    /// (Re)arm the background refresh schedule for the current session.
    ///
    /// The schedule follows every session change on its own and stops once
    /// the session is cleared.
    pub fn schedule_proactive_refresh(&self) {
        let task = tokio::spawn(refresh_scheduler::run(
            self.me.clone(),
            self.state.subscribe(),
            self.policy.clone(),
        ));
        if let Some(previous) = self.scheduler_slot().replace(task) {
            previous.abort();
        }
    }

    fn stop_scheduler(&self) {
        if let Some(task) = self.scheduler_slot().take() {
            task.abort();
        }
    }

    fn scheduler_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── State transitions ─────────────────────────────────────────────────

    //
    // Every transition holds `transition` across the state change and the
    // store write, so the file on disk always ends up matching the state.

    /// Replace the session, persist it and return the new generation.
    fn install(&self, session: Session, profile: Option<UserProfile>) -> u64 {
        let _transition = self.transition_guard();
        let mut generation = 0;
        self.state.send_modify(|state| {
            state.session = Some(session.clone());
            state.profile = profile;
            state.generation += 1;
            generation = state.generation;
        });
        self.persist(&session);
        generation
    }

    /// Replace the session only if it is still the one seen at `generation`.
    ///
    /// The profile is kept when it belongs to the same user. Returns the new
    /// generation, or `None` when a login or logout got there first.
    fn replace_if_current(&self, generation: u64, session: Session) -> Option<u64> {
        let _transition = self.transition_guard();
        let mut next = None;
        self.state.send_if_modified(|state| {
            if state.generation != generation || state.session.is_none() {
                return false;
            }
            if state.profile.as_ref().is_some_and(|p| p.user_id != session.user_id) {
                state.profile = None;
            }
            state.session = Some(session.clone());
            state.generation += 1;
            next = Some(state.generation);
            true
        });
        if next.is_some() {
            self.persist(&session);
        }
        next
    }

    /// Drop session and profile together, locally and on disk.
    fn clear(&self) {
        let _transition = self.transition_guard();
        self.state.send_modify(Self::reset);
        self.forget();
    }

    /// [`clear`](Self::clear), but only while `generation` is current.
    fn clear_if_current(&self, generation: u64) -> bool {
        let _transition = self.transition_guard();
        let cleared = self.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            Self::reset(state);
            true
        });
        if cleared {
            self.forget();
        }
        cleared
    }

    fn reset(state: &mut AuthState) {
        state.session = None;
        state.profile = None;
        state.generation += 1;
    }

    fn persist(&self, session: &Session) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(session) {
                tracing::warn!(error = %e, "could not persist session");
            }
        }
    }

    fn forget(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                tracing::warn!(error = %e, "could not remove stored session");
            }
        }
    }

    fn transition_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.transition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

#[async_trait]
impl TokenSource for SessionManager {
    async fn bearer_token(&self) -> Option<String> {
        self.access_token().await.ok()
    }
}
