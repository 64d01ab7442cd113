//! Live dashboard orchestrator.
//!
//! Loads students, recent entry logs and alerts in parallel, keeps each list
//! current through its own realtime subscription, and sends a fresh
//! [`DashboardSnapshot`] through an `mpsc` channel after every change that
//! altered a list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use hostel_core::error::Result;
use hostel_core::models::{Alert, EntryLog, Student};
use hostel_core::stats::DashboardStats;
use hostel_data::realtime::{ChangeFeed, ChangeKind};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::live_list::LiveList;
use crate::relay::{self, SharedList, Subscription};
use crate::services::{HostelService, ALERTS, ENTRY_LOGS, STUDENTS};
use crate::session_manager::SessionManager;

/// Entry logs kept on the dashboard unless configured otherwise.
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Snapshots buffered before the publisher waits for the consumer.
const SNAPSHOT_BUFFER: usize = 16;

// ── Public types ──────────────────────────────────────────────────────────────

/// The lists and counters as of one moment.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub students: Vec<Student>,
    pub entry_logs: Vec<EntryLog>,
    pub alerts: Vec<Alert>,
    pub stats: DashboardStats,
    pub generated_at: DateTime<Utc>,
}

// ── Dashboard ─────────────────────────────────────────────────────────────────

pub struct Dashboard {
    service: HostelService,
    feed: Arc<dyn ChangeFeed>,
    timezone: Tz,
    recent_limit: usize,
}

impl Dashboard {
    /// `timezone` decides what "today" means for the entry counters.
    pub fn new(service: HostelService, feed: Arc<dyn ChangeFeed>, timezone: Tz) -> Self {
        Self {
            service,
            feed,
            timezone,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    /// Bound the entry log list to the `limit` most recent rows.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Load the initial data and start relaying changes.
    ///
    /// Fails only when the initial load fails. A table whose subscription
    /// cannot be opened stays at its initial contents.
    pub async fn start(self) -> Result<(mpsc::Receiver<DashboardSnapshot>, DashboardHandle)> {
        let (students, entry_logs, alerts) = tokio::try_join!(
            self.service.list_students(),
            self.service.recent_entry_logs(self.recent_limit as u64),
            self.service.list_alerts(None),
        )?;
        tracing::info!(
            students = students.len(),
            entry_logs = entry_logs.len(),
            alerts = alerts.len(),
            "dashboard data loaded"
        );

        let lists = Lists {
            students: Arc::new(RwLock::new(LiveList::new(students))),
            entry_logs: Arc::new(RwLock::new(LiveList::bounded(entry_logs, self.recent_limit))),
            alerts: Arc::new(RwLock::new(LiveList::new(alerts))),
        };

        let changed = Arc::new(Notify::new());
        let feed = self.feed.as_ref();
        let opened = tokio::join!(
            relay::subscribe(feed, STUDENTS, lists.students.clone(), wake(&changed)),
            relay::subscribe(feed, ENTRY_LOGS, lists.entry_logs.clone(), wake(&changed)),
            relay::subscribe(feed, ALERTS, lists.alerts.clone(), wake(&changed)),
        );

        let mut subscriptions = Vec::with_capacity(3);
        for (table, result) in [(STUDENTS, opened.0), (ENTRY_LOGS, opened.1), (ALERTS, opened.2)] {
            match result {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => tracing::warn!(table, error = %e, "live updates unavailable"),
            }
        }

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let session = self.service.api().session().clone();
        let timezone = self.timezone;
        let publisher = tokio::spawn(async move {
            publish(lists, changed, tx, session, timezone).await;
        });

        Ok((
            rx,
            DashboardHandle {
                subscriptions,
                publisher,
            },
        ))
    }
}

// ── DashboardHandle ───────────────────────────────────────────────────────────

/// Owns the subscriptions and the publisher task.
///
/// Drop or call [`DashboardHandle::abort`] to stop everything.
pub struct DashboardHandle {
    subscriptions: Vec<Subscription>,
    publisher: JoinHandle<()>,
}

impl DashboardHandle {
    /// Tables whose changes are being relayed.
    pub fn live_tables(&self) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.table())
            .collect()
    }

    pub fn abort(self) {
        drop(self);
    }
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        self.publisher.abort();
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
    }
}

// ── Private implementation ────────────────────────────────────────────────────

struct Lists {
    students: SharedList<Student>,
    entry_logs: SharedList<EntryLog>,
    alerts: SharedList<Alert>,
}

impl Lists {
    async fn snapshot(&self, now: DateTime<Utc>, tz: Tz) -> DashboardSnapshot {
        let students = self.students.read().await.to_vec();
        let entry_logs = self.entry_logs.read().await.to_vec();
        let alerts = self.alerts.read().await.to_vec();
        let stats = DashboardStats::calculate(&students, &entry_logs, &alerts, now, tz);
        DashboardSnapshot {
            students,
            entry_logs,
            alerts,
            stats,
            generated_at: now,
        }
    }
}

fn wake(changed: &Arc<Notify>) -> impl Fn(ChangeKind) + Send + Sync + 'static {
    let changed = changed.clone();
    move |_| changed.notify_one()
}

/// Send the current snapshot, then one more after each batch of changes.
///
/// A stored permit means changes made while a snapshot was being sent are
/// never missed; bursts collapse into a single snapshot.
async fn publish(
    lists: Lists,
    changed: Arc<Notify>,
    tx: mpsc::Sender<DashboardSnapshot>,
    session: Arc<SessionManager>,
    tz: Tz,
) {
    loop {
        let snapshot = lists.snapshot(session.clock().now(), tz).await;
        if let Err(e) = tx.send(snapshot).await {
            tracing::debug!(error = %e, "dashboard receiver dropped; publisher stopping");
            return;
        }
        changed.notified().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::ApiClient;
    use crate::test_support::{FakeAuth, FakeFeed, FakeTransport, PASSWORD};
    use hostel_data::transport::HttpResponse;
    use serde_json::{json, Value};
    use std::time::Duration;

    const BASE: &str = "https://project.example.co";

    fn student(id: &str, active: bool) -> Value {
        json!({
            "id": id,
            "register_number": format!("REG-{id}"),
            "full_name": format!("Student {id}"),
            "hostel_status": "resident",
            "is_active": active,
            "created_at": "2024-01-10T00:00:00Z",
        })
    }

    fn entry(id: &str, kind: &str, at: &str) -> Value {
        json!({
            "id": id,
            "register_number": "REG-s1",
            "student_name": "Student s1",
            "entry_type": kind,
            "timestamp": at,
            "location": "Main gate",
            "created_at": at,
        })
    }

    fn alert(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "image_url": "https://cdn.example/a.jpg",
            "timestamp": "2024-03-01T07:00:00Z",
            "location": "Back gate",
            "status": status,
            "created_at": "2024-03-01T07:00:00Z",
        })
    }

    fn rows(rows: Vec<Value>) -> Result<HttpResponse> {
        let range = format!("0-{}/{}", rows.len().saturating_sub(1), rows.len());
        Ok(HttpResponse::new(200, Value::Array(rows)).with_header("Content-Range", range))
    }

    /// Backend holding two students, two of today's entry logs and one
    /// pending alert. The clock of [`FakeAuth`] reads 2024-03-01 12:00 UTC.
    fn backend() -> Arc<FakeTransport> {
        FakeTransport::new(|req| {
            if req.url.contains("/students") {
                rows(vec![student("s1", true), student("s2", false)])
            } else if req.url.contains("/entry_logs") {
                rows(vec![
                    entry("e2", "exit", "2024-03-01T09:00:00Z"),
                    entry("e1", "entry", "2024-03-01T08:00:00Z"),
                ])
            } else {
                rows(vec![alert("a1", "pending")])
            }
        })
    }

    async fn dashboard(transport: Arc<FakeTransport>, feed: Arc<FakeFeed>) -> Dashboard {
        let auth = FakeAuth::new();
        let session = SessionManager::builder(auth.clone())
            .clock(auth.clock.clone())
            .build();
        assert!(session.login("warden@hostel.edu", PASSWORD).await.success);
        session.teardown();
        let api = ApiClient::new(transport, session, BASE, Some("anon".to_string())).unwrap();
        Dashboard::new(HostelService::new(Arc::new(api)), feed, Tz::UTC)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ── initial snapshot ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_initial_snapshot_carries_lists_and_stats() {
        let feed = FakeFeed::new();
        let (mut rx, handle) = dashboard(backend(), feed.clone()).await.start().await.unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.students.len(), 2);
        assert_eq!(snapshot.entry_logs.len(), 2);
        assert_eq!(snapshot.alerts.len(), 1);
        assert_eq!(
            snapshot.stats,
            DashboardStats {
                total_students: 2,
                active_students: 1,
                today_entries: 1,
                today_exits: 1,
                pending_alerts: 1,
                resolved_alerts: 0,
            }
        );
        assert_eq!(handle.live_tables(), [STUDENTS, ENTRY_LOGS, ALERTS]);
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_reported() {
        let transport = FakeTransport::new(|req| {
            if req.url.contains("/alerts") {
                Ok(HttpResponse::new(500, json!({ "message": "boom" })))
            } else {
                rows(Vec::new())
            }
        });
        let result = dashboard(transport, FakeFeed::new()).await.start().await;
        assert!(result.is_err());
    }

    // ── live updates ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_change_publishes_new_snapshot() {
        let feed = FakeFeed::new();
        let (mut rx, _handle) = dashboard(backend(), feed.clone()).await.start().await.unwrap();
        rx.recv().await.unwrap();

        feed.emit(ALERTS, ChangeKind::Update, Some(alert("a1", "resolved")), None).await;
        let snapshot = rx.recv().await.unwrap();

        assert_eq!(snapshot.stats.pending_alerts, 0);
        assert_eq!(snapshot.stats.resolved_alerts, 1);
    }

    #[tokio::test]
    async fn test_entry_logs_stay_bounded() {
        let feed = FakeFeed::new();
        let (mut rx, _handle) = dashboard(backend(), feed.clone())
            .await
            .with_recent_limit(2)
            .start()
            .await
            .unwrap();
        rx.recv().await.unwrap();

        feed.emit(ENTRY_LOGS, ChangeKind::Insert, Some(entry("e3", "entry", "2024-03-01T10:00:00Z")), None)
            .await;
        let snapshot = rx.recv().await.unwrap();

        let ids: Vec<&str> = snapshot.entry_logs.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e3", "e2"]);
        assert_eq!(snapshot.stats.today_entries, 1);
    }

    #[tokio::test]
    async fn test_failed_subscription_leaves_other_tables_live() {
        let feed = FakeFeed::new();
        feed.fail_tables.lock().unwrap().push(ALERTS.to_string());
        let (mut rx, handle) = dashboard(backend(), feed.clone()).await.start().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(handle.live_tables(), [STUDENTS, ENTRY_LOGS]);

        feed.emit(STUDENTS, ChangeKind::Delete, None, Some(json!({ "id": "s2" }))).await;
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.stats.total_students, 1);
    }

    // ── teardown ──────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_closes_every_subscription() {
        let feed = FakeFeed::new();
        let (mut rx, handle) = dashboard(backend(), feed.clone()).await.start().await.unwrap();
        rx.recv().await.unwrap();

        drop(handle);
        settle().await;

        for table in [STUDENTS, ENTRY_LOGS, ALERTS] {
            assert!(feed.is_closed(table), "{table} still open");
        }
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(next, Ok(None)));
    }
}
