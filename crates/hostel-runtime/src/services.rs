//! Typed operations over the hostel tables.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use hostel_core::error::{HostelError, Result};
use hostel_core::models::{
    Alert, AlertStatus, AlertUpdate, EntryLog, NewAlert, NewEntryLog, ProfileUpdate, Student,
    StudentDraft, UserProfile,
};
use hostel_core::time_utils::day_bounds;
use hostel_data::postgrest::{Query, PREFER_RETURN_REPRESENTATION};
use hostel_data::retry::retry;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api_client::{ApiClient, RequestOptions};

pub const STUDENTS: &str = "students";
pub const ENTRY_LOGS: &str = "entry_logs";
pub const ALERTS: &str = "alerts";
pub const PROFILES: &str = "profiles";

/// Reads and writes of students, entry logs, alerts and profiles.
///
/// Whole-list reads are paginated and retried; single-row reads and all
/// writes are one call each.
#[derive(Clone)]
pub struct HostelService {
    api: Arc<ApiClient>,
}

impl HostelService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    // ── Students ──────────────────────────────────────────────────────────

    pub async fn list_students(&self) -> Result<Vec<Student>> {
        let query = Query::table(STUDENTS).order_desc("created_at");
        self.api.fetch_all_with_retry(&query).await
    }

    pub async fn get_student(&self, id: &str) -> Result<Option<Student>> {
        self.first(Query::table(STUDENTS).eq("id", id)).await
    }

    pub async fn create_student(&self, draft: &StudentDraft) -> Result<Student> {
        self.insert(STUDENTS, draft).await
    }

    pub async fn update_student(&self, id: &str, draft: &StudentDraft) -> Result<Student> {
        self.patch(STUDENTS, id, draft).await
    }

    pub async fn delete_student(&self, id: &str) -> Result<()> {
        self.delete(STUDENTS, id).await
    }

    // ── Entry logs ────────────────────────────────────────────────────────

    /// The `limit` most recent entry logs, newest first.
    pub async fn recent_entry_logs(&self, limit: u64) -> Result<Vec<EntryLog>> {
        let query = &Query::table(ENTRY_LOGS).order_desc("timestamp").limit(limit);
        let policy = self.api.policy();
        retry(policy.retry_attempts, policy.retry_delay, move || {
            self.api.fetch_query(query, RequestOptions::get())
        })
        .await
    }

    pub async fn entry_logs_for_student(&self, student_id: &str) -> Result<Vec<EntryLog>> {
        let query = Query::table(ENTRY_LOGS)
            .eq("student_id", student_id)
            .order_desc("timestamp");
        self.api.fetch_all_with_retry(&query).await
    }

    /// Entry logs with `start <= timestamp < end`, newest first.
    pub async fn entry_logs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EntryLog>> {
        let query = Query::table(ENTRY_LOGS)
            .gte("timestamp", start.to_rfc3339_opts(SecondsFormat::Secs, true))
            .lt("timestamp", end.to_rfc3339_opts(SecondsFormat::Secs, true))
            .order_desc("timestamp");
        self.api.fetch_all_with_retry(&query).await
    }

    /// Entry logs of one calendar day in `tz`.
    pub async fn entry_logs_on(&self, date: NaiveDate, tz: Tz) -> Result<Vec<EntryLog>> {
        let (start, end) = day_bounds(date, tz);
        self.entry_logs_between(start, end).await
    }

    pub async fn create_entry_log(&self, log: &NewEntryLog) -> Result<EntryLog> {
        self.insert(ENTRY_LOGS, log).await
    }

    // ── Alerts ────────────────────────────────────────────────────────────

    pub async fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>> {
        let mut query = Query::table(ALERTS);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        self.api
            .fetch_all_with_retry(&query.order_desc("timestamp"))
            .await
    }

    pub async fn create_alert(&self, alert: &NewAlert) -> Result<Alert> {
        self.insert(ALERTS, alert).await
    }

    pub async fn update_alert(&self, id: &str, update: &AlertUpdate) -> Result<Alert> {
        self.patch(ALERTS, id, update).await
    }

    /// Mark an alert resolved by `resolved_by` at `at`.
    pub async fn resolve_alert(
        &self,
        id: &str,
        resolved_by: &str,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Alert> {
        let update = AlertUpdate {
            status: Some(AlertStatus::Resolved),
            resolved_by: Some(resolved_by.to_string()),
            resolved_at: Some(at),
            notes,
        };
        self.update_alert(id, &update).await
    }

    pub async fn delete_alert(&self, id: &str) -> Result<()> {
        self.delete(ALERTS, id).await
    }

    // ── Profiles ──────────────────────────────────────────────────────────

    /// Latest profile row for an auth user.
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let query = Query::table(PROFILES)
            .eq("user_id", user_id)
            .order_desc("updated_at");
        self.first(query).await
    }

    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<UserProfile> {
        let query = Query::write(PROFILES).eq("user_id", user_id);
        let rows: Vec<UserProfile> = self.write(&query, RequestOptions::patch(to_body(update)?)).await?;
        single(rows, PROFILES)
    }

    // ── Plumbing ──────────────────────────────────────────────────────────

    async fn first<T: DeserializeOwned>(&self, query: Query) -> Result<Option<T>> {
        let rows: Vec<T> = self
            .api
            .fetch_query(&query.limit(1), RequestOptions::get())
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert<B: Serialize, T: DeserializeOwned>(&self, table: &str, body: &B) -> Result<T> {
        let rows = self
            .write(&Query::write(table), RequestOptions::post(to_body(body)?))
            .await?;
        single(rows, table)
    }

    async fn patch<B: Serialize, T: DeserializeOwned>(&self, table: &str, id: &str, body: &B) -> Result<T> {
        let query = Query::write(table).eq("id", id);
        let rows = self
            .write(&query, RequestOptions::patch(to_body(body)?))
            .await?;
        single(rows, table)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let query = Query::write(table).eq("id", id);
        let _: serde_json::Value = self.api.fetch_query(&query, RequestOptions::delete()).await?;
        tracing::info!(table, id, "row deleted");
        Ok(())
    }

    async fn write<T: DeserializeOwned>(&self, query: &Query, options: RequestOptions) -> Result<Vec<T>> {
        let options = options.with_header(PREFER_RETURN_REPRESENTATION.0, PREFER_RETURN_REPRESENTATION.1);
        self.api.fetch_query(query, options).await
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(body)?)
}

/// The one row a write echoed back.
fn single<T>(rows: Vec<T>, table: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| HostelError::InvalidResponse(format!("no {table} row returned")))
}
