//! Client for the application's auth endpoints and the profile lookup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostel_core::clock::{Clock, SystemClock};
use hostel_core::error::{HostelError, Result};
use hostel_core::models::{AuthUser, Session, SessionPayload, UserProfile};
use hostel_core::validation::SignupRequest;
use serde::Deserialize;
use serde_json::json;

use crate::postgrest::{Query, API_KEY_HEADER};
use crate::transport::{send_within, HttpRequest, HttpResponse, Method, Transport};

/// Budget for every auth call.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(8);

/// A successful login: the new session plus the profile when the backend
/// embedded one.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub profile: Option<UserProfile>,
}

/// Operations the session manager needs from the auth service.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome>;

    async fn signup(&self, request: &SignupRequest) -> Result<()>;

    /// Exchange the refresh token of `current` for a new session.
    async fn refresh(&self, current: &Session) -> Result<Session>;

    /// Revoke `access_token` server-side.
    async fn logout(&self, access_token: &str) -> Result<()>;

    /// Most recently updated profile of `user_id`, if one exists.
    async fn fetch_profile(&self, access_token: &str, user_id: &str) -> Result<Option<UserProfile>>;
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<AuthData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthData {
    #[serde(default)]
    session: Option<SessionPayload>,
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    profile: Option<UserProfile>,
}

impl AuthEnvelope {
    /// Decode an auth response. `success: false` (or a body that is not an
    /// envelope at all) becomes [`HostelError::Auth`] carrying the server
    /// message or `fallback`.
    fn decode(response: HttpResponse, fallback: &str) -> Result<AuthData> {
        let server_message = response.error_message();
        let envelope: AuthEnvelope = match serde_json::from_value(response.body) {
            Ok(env) => env,
            Err(_) => {
                return Err(HostelError::Auth(
                    server_message.unwrap_or_else(|| fallback.to_string()),
                ))
            }
        };
        if !envelope.success {
            return Err(HostelError::Auth(
                envelope.error.unwrap_or_else(|| fallback.to_string()),
            ));
        }
        Ok(envelope.data.unwrap_or_default())
    }
}

/// Attach the top-level user to the session payload when it has none.
fn session_from(
    data: AuthData,
    now: DateTime<Utc>,
    fallback_user_id: Option<&str>,
) -> Result<(Session, Option<UserProfile>)> {
    let mut payload = data
        .session
        .ok_or_else(|| HostelError::Auth("Invalid session data received".to_string()))?;
    if payload.user.is_none() {
        payload.user = data.user;
    }
    let session = payload.into_session(now, fallback_user_id)?;
    Ok((session, data.profile))
}

// ── HttpAuthBackend ───────────────────────────────────────────────────────────

/// [`AuthBackend`] speaking to `/api/auth/*` on the application API and to
/// the `profiles` table on the data API.
pub struct HttpAuthBackend {
    transport: Arc<dyn Transport>,
    api_url: String,
    data_url: String,
    anon_key: Option<String>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpAuthBackend {
    pub fn new(transport: Arc<dyn Transport>, api_url: &str, data_url: &str, anon_key: Option<String>) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            data_url: data_url.to_string(),
            anon_key,
            timeout: DEFAULT_AUTH_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clock used to turn a relative `expires_in` into an instant.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/auth/{name}", self.api_url)
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        send_within(self.transport.as_ref(), request, self.timeout).await
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let request = HttpRequest::post(
            self.endpoint("login"),
            json!({ "email": email, "password": password }),
        );
        let response = self.call(request).await?;
        let data = AuthEnvelope::decode(response, "Login failed")?;
        let (session, profile) = session_from(data, self.clock.now(), None)?;
        tracing::debug!(user_id = %session.user_id, has_profile = profile.is_some(), "login accepted");
        Ok(LoginOutcome { session, profile })
    }

    async fn signup(&self, request: &SignupRequest) -> Result<()> {
        let body = serde_json::to_value(request)?;
        let response = self.call(HttpRequest::post(self.endpoint("signup"), body)).await?;
        AuthEnvelope::decode(response, "Signup failed")?;
        Ok(())
    }

    async fn refresh(&self, current: &Session) -> Result<Session> {
        let request = HttpRequest::post(
            self.endpoint("refresh"),
            json!({ "refresh_token": current.refresh_token }),
        );
        let response = self.call(request).await?;
        let data = AuthEnvelope::decode(response, "Failed to refresh token")?;
        let (session, _) = session_from(data, self.clock.now(), Some(&current.user_id))?;
        Ok(session)
    }

    async fn logout(&self, access_token: &str) -> Result<()> {
        let request = HttpRequest::new(Method::Post, self.endpoint("logout")).with_bearer(access_token);
        let response = self.call(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }

    async fn fetch_profile(&self, access_token: &str, user_id: &str) -> Result<Option<UserProfile>> {
        let query = Query::table("profiles")
            .eq("user_id", user_id)
            .order_desc("updated_at")
            .limit(1);
        let mut request = HttpRequest::get(query.url(&self.data_url)?).with_bearer(access_token);
        if let Some(key) = &self.anon_key {
            request = request.with_header(API_KEY_HEADER, key.as_str());
        }

        let response = self.call(request).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let mut rows: Vec<UserProfile> = serde_json::from_value(response.body)?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }
}
