mod bootstrap;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use hostel_core::clock::{Clock, SystemClock};
use hostel_core::models::{Alert, EntryLog, Student};
use hostel_core::session_store::{default_state_dir, SessionStore};
use hostel_core::settings::Settings;
use hostel_core::time_utils::resolve_timezone;
use hostel_data::auth_backend::HttpAuthBackend;
use hostel_data::realtime::RealtimeSocketFeed;
use hostel_data::transport::{ReqwestTransport, Transport};
use hostel_runtime::api_client::ApiClient;
use hostel_runtime::dashboard::{Dashboard, DashboardSnapshot};
use hostel_runtime::policy::FetchPolicy;
use hostel_runtime::services::HostelService;
use hostel_runtime::session_manager::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories(&default_state_dir())?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Hostel Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "API: {}, data: {}, view: {}",
        settings.api_url,
        settings.data_base_url(),
        settings.view
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());
    let backend = HttpAuthBackend::new(
        transport.clone(),
        &settings.api_url,
        settings.data_base_url(),
        settings.anon_key.clone(),
    )
    .with_clock(clock.clone());
    let session = SessionManager::builder(Arc::new(backend))
        .clock(clock)
        .store(SessionStore::default_location())
        .build();

    let restored = session.init().await;

    if settings.logout {
        session.logout().await;
        println!("Signed out.");
        return Ok(());
    }

    if !restored {
        sign_in(&session, &settings).await?;
    }

    let result = run_view(&settings, &session, transport).await;
    session.teardown();
    result
}

async fn sign_in(session: &SessionManager, settings: &Settings) -> Result<()> {
    let (Some(email), Some(password)) = (settings.email.as_deref(), settings.password.as_deref()) else {
        bail!("no stored session; pass --email and --password (or HOSTEL_EMAIL / HOSTEL_PASSWORD)");
    };
    let response = session.login(email, password).await;
    if !response.success {
        bail!(
            "sign-in failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn run_view(settings: &Settings, session: &Arc<SessionManager>, transport: Arc<dyn Transport>) -> Result<()> {
    let tz = resolve_timezone(&settings.timezone);
    let policy = FetchPolicy {
        page_size: u64::from(settings.page_size),
        ..FetchPolicy::default()
    };
    let api = ApiClient::new(
        transport,
        session.clone(),
        settings.data_base_url(),
        settings.anon_key.clone(),
    )?
    .with_policy(policy);
    let service = HostelService::new(Arc::new(api));

    if let Some(profile) = session.profile() {
        tracing::info!(user = %profile.full_name, role = %profile.role, "signed in");
    }

    match settings.view.as_str() {
        "dashboard" => run_dashboard(settings, session, service, tz).await,
        "students" => {
            let students = service.list_students().await.context("loading students")?;
            print_students(&students);
            Ok(())
        }
        "entries" => {
            let logs = service
                .recent_entry_logs(u64::from(settings.recent_limit))
                .await
                .context("loading entry logs")?;
            print_entry_logs(&logs, tz);
            Ok(())
        }
        "alerts" => {
            let alerts = service.list_alerts(None).await.context("loading alerts")?;
            print_alerts(&alerts, tz);
            Ok(())
        }
        unknown => bail!("unknown view: {unknown}"),
    }
}

async fn run_dashboard(
    settings: &Settings,
    session: &Arc<SessionManager>,
    service: HostelService,
    tz: Tz,
) -> Result<()> {
    let feed = RealtimeSocketFeed::new(settings.data_base_url(), settings.anon_key.as_deref())?
        .with_tokens(session.clone());
    let dashboard = Dashboard::new(service, Arc::new(feed), tz)
        .with_recent_limit(settings.recent_limit as usize);

    tracing::info!("Starting live dashboard...");
    let (mut rx, handle) = dashboard.start().await.context("loading dashboard")?;
    tracing::info!(tables = ?handle.live_tables(), "live updates active");

    loop {
        tokio::select! {
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => print_snapshot(&snapshot, tz),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; stopping dashboard");
                break;
            }
        }
    }

    handle.abort();
    Ok(())
}

// ── Output ─────────────────────────────────────────────────────────────────────

fn local(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

fn print_snapshot(snapshot: &DashboardSnapshot, tz: Tz) {
    let s = &snapshot.stats;
    println!("── {} ──", local(snapshot.generated_at, tz));
    println!(
        "Students: {} ({} active)   Today: {} in / {} out   Alerts: {} pending / {} resolved",
        s.total_students, s.active_students, s.today_entries, s.today_exits, s.pending_alerts, s.resolved_alerts
    );
    for log in snapshot.entry_logs.iter().take(5) {
        println!(
            "  {}  {:<5}  {} ({})  @ {}",
            local(log.timestamp, tz),
            format!("{:?}", log.entry_type).to_lowercase(),
            log.student_name,
            log.register_number,
            log.location
        );
    }
}

fn print_students(students: &[Student]) {
    for s in students {
        println!(
            "{:<14} {:<30} {:<8} {}",
            s.register_number,
            s.full_name,
            s.room_number.as_deref().unwrap_or("-"),
            if s.is_active { "active" } else { "inactive" }
        );
    }
    println!("{} students", students.len());
}

fn print_entry_logs(logs: &[EntryLog], tz: Tz) {
    for log in logs {
        println!(
            "{}  {:<5}  {:<14} {:<30} {}",
            local(log.timestamp, tz),
            format!("{:?}", log.entry_type).to_lowercase(),
            log.register_number,
            log.student_name,
            log.location
        );
    }
    println!("{} entry logs", logs.len());
}

fn print_alerts(alerts: &[Alert], tz: Tz) {
    for a in alerts {
        println!(
            "{}  {:<13} {:<20} {}",
            local(a.timestamp, tz),
            a.status.as_str(),
            a.location,
            a.confidence_score
                .map(|c| format!("{:.0}%", c * 100.0))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!("{} alerts", alerts.len());
}
