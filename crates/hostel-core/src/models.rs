use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HostelError, Result};

/// Token lifetime assumed when the backend omits both `expires_at` and
/// `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Rows mirrored from the backend carry an opaque string id.
pub trait Identified {
    fn id(&self) -> &str;
}

// ── Session ───────────────────────────────────────────────────────────────────

/// The access/refresh token pair identifying an authenticated client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// UTC instant after which the access token is rejected.
    pub expires_at: DateTime<Utc>,
    /// Auth user id the session belongs to; profiles are keyed by it.
    pub user_id: String,
}

impl Session {
    /// Signed time left before expiry; negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// The user object the auth backend returns next to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session as it appears on the wire (`data.session` in auth responses).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Seconds from issue.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

impl SessionPayload {
    /// Convert the wire payload into a [`Session`].
    ///
    /// Expiry resolution order: `expires_at`, then `now + expires_in`, then
    /// `now + DEFAULT_TOKEN_LIFETIME_SECS`. An `expires_in` too large to add
    /// to `now` counts as absent. The user id comes from the embedded
    /// user, falling back to `fallback_user_id` (the refresh endpoint does not
    /// always echo the user).
    pub fn into_session(self, now: DateTime<Utc>, fallback_user_id: Option<&str>) -> Result<Session> {
        let invalid = || HostelError::Auth("Invalid session data received".to_string());

        let access_token = self.access_token.filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        let user_id = self
            .user
            .map(|u| u.id)
            .or_else(|| fallback_user_id.map(str::to_string))
            .ok_or_else(invalid)?;

        let after = |secs: i64| Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d));
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.and_then(after))
            .or_else(|| after(DEFAULT_TOKEN_LIFETIME_SECS))
            .ok_or_else(invalid)?;

        Ok(Session {
            access_token,
            refresh_token,
            expires_at,
            user_id,
        })
    }
}

// ── Profiles ──────────────────────────────────────────────────────────────────

/// Staff and student roles known to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    HostelDirector,
    Warden,
    DeputyWarden,
    AssistantWarden,
    FloorIncharge,
    Caretaker,
    Student,
    CaseManager,
    Investigator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::HostelDirector => "hostel_director",
            UserRole::Warden => "warden",
            UserRole::DeputyWarden => "deputy_warden",
            UserRole::AssistantWarden => "assistant_warden",
            UserRole::FloorIncharge => "floor_incharge",
            UserRole::Caretaker => "caretaker",
            UserRole::Student => "student",
            UserRole::CaseManager => "case_manager",
            UserRole::Investigator => "investigator",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `profiles` table, derived from the session's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identified for UserProfile {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Editable profile fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

// ── Students ──────────────────────────────────────────────────────────────────

/// Residency status of a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostelStatus {
    Resident,
    DayScholar,
    FormerResident,
}

/// A row of the `students` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub register_number: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub hostel_status: HostelStatus,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default)]
    pub building_id: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identified for Student {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Writable student fields for create and update calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostel_status: Option<HostelStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

// ── Entry logs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Entry,
    Exit,
}

/// A gate camera sighting of a student entering or leaving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLog {
    pub id: String,
    #[serde(default)]
    pub student_id: Option<String>,
    pub register_number: String,
    pub student_name: String,
    pub entry_type: EntryType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

impl Identified for EntryLog {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Fields supplied when recording a new entry log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntryLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub register_number: String,
    pub student_name: String,
    pub entry_type: EntryType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub location: String,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

/// Workflow state of a security alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Pending,
    Investigating,
    Investigated,
    Resolved,
    FalseAlarm,
    #[serde(other)]
    Unknown,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Pending => "pending",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Investigated => "investigated",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalseAlarm => "false_alarm",
            AlertStatus::Unknown => "unknown",
        }
    }
}

/// An unrecognised-face alert raised by a gate camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    pub location: String,
    pub status: AlertStatus,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// An alert counts as resolved once it has a resolution time or its
    /// status says so.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some() || self.status == AlertStatus::Resolved
    }
}

impl Identified for Alert {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Fields supplied when raising an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    pub location: String,
    pub status: AlertStatus,
}

/// Mutable alert fields for update calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AlertStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ── Response envelope ─────────────────────────────────────────────────────────

/// The uniform `{success, data?, error?}` result shape.
///
/// Fetcher operations return this instead of failing so that callers can
/// render error states without any error plumbing. It deserialises directly
/// from the backend's JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Success flag plus optional payload as a `Result`.
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(HostelError::Api(
                self.error
                    .unwrap_or_else(|| "Unknown error occurred".to_string()),
            ))
        }
    }

    /// Like [`into_result`](Self::into_result) but a success without data is
    /// also an error.
    pub fn into_data(self) -> Result<T> {
        self.into_result()?
            .ok_or_else(|| HostelError::InvalidResponse("response carried no data".to_string()))
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::fail(e.to_string()),
        }
    }
}
