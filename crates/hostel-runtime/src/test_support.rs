//! In-memory fakes of the network collaborators, with call counters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hostel_core::error::{HostelError, Result};
use hostel_core::models::{Session, UserProfile, UserRole};
use hostel_core::validation::SignupRequest;
use hostel_data::auth_backend::{AuthBackend, LoginOutcome};
use hostel_data::realtime::{ChangeFeed, ChangeKind, ChangeStream, RawChange};
use hostel_data::transport::{HttpRequest, HttpResponse, Transport};
use serde_json::Value;
use tokio::sync::mpsc;

use hostel_core::clock::ManualClock;

pub const PASSWORD: &str = "correct-horse";

pub fn session_expiring_in(clock: &ManualClock, left: chrono::Duration) -> Session {
    use hostel_core::clock::Clock;
    Session {
        access_token: "access-restored".to_string(),
        refresh_token: "refresh-restored".to_string(),
        expires_at: clock.now() + left,
        user_id: "u-1".to_string(),
    }
}

pub fn profile() -> UserProfile {
    UserProfile {
        id: "p-1".to_string(),
        user_id: "u-1".to_string(),
        full_name: "Meera K".to_string(),
        email: "warden@hostel.edu".to_string(),
        role: UserRole::Warden,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: None,
    }
}

// ── FakeAuth ──────────────────────────────────────────────────────────────────

/// Auth backend issuing 60 minute tokens against a manual clock.
pub struct FakeAuth {
    pub clock: Arc<ManualClock>,
    pub login_calls: AtomicUsize,
    pub signup_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub embed_profile: AtomicBool,
    pub fail_profile: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub fail_logout: AtomicBool,
    pub stall_logout: AtomicBool,
    refresh_latency: Mutex<Duration>,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            )),
            login_calls: AtomicUsize::new(0),
            signup_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            embed_profile: AtomicBool::new(false),
            fail_profile: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            stall_logout: AtomicBool::new(false),
            refresh_latency: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_refresh_latency(&self, latency: Duration) {
        *self.refresh_latency.lock().unwrap() = latency;
    }

    fn issue(&self, tag: &str, user_id: &str) -> Session {
        use hostel_core::clock::Clock;
        Session {
            access_token: format!("access-{tag}"),
            refresh_token: format!("refresh-{tag}"),
            expires_at: self.clock.now() + chrono::Duration::minutes(60),
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl AuthBackend for FakeAuth {
    async fn login(&self, _email: &str, password: &str) -> Result<LoginOutcome> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if password != PASSWORD {
            return Err(HostelError::Auth("Invalid login credentials".to_string()));
        }
        Ok(LoginOutcome {
            session: self.issue("login", "u-1"),
            profile: self.embed_profile.load(Ordering::SeqCst).then(profile),
        })
    }

    async fn signup(&self, _request: &SignupRequest) -> Result<()> {
        self.signup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh(&self, current: &Session) -> Result<Session> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.refresh_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(HostelError::Auth("Failed to refresh token".to_string()));
        }
        Ok(self.issue(&n.to_string(), &current.user_id))
    }

    async fn logout(&self, _access_token: &str) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_logout.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(HostelError::http(500, None));
        }
        Ok(())
    }

    async fn fetch_profile(&self, _access_token: &str, _user_id: &str) -> Result<Option<UserProfile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_profile.load(Ordering::SeqCst) {
            return Err(HostelError::http(500, None));
        }
        Ok(Some(profile()))
    }
}

// ── FakeTransport ─────────────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Transport answering every request through one closure, recording each.
pub struct FakeTransport {
    respond: Responder,
    seen: Mutex<Vec<HttpRequest>>,
    stall_after: Mutex<Option<usize>>,
}

impl FakeTransport {
    pub fn new(respond: impl Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            seen: Mutex::new(Vec::new()),
            stall_after: Mutex::new(None),
        })
    }

    /// Replay `replies` in order, then fail with a network error.
    pub fn scripted(replies: Vec<HttpResponse>) -> Arc<Self> {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| HostelError::Network("no scripted reply".to_string()))
        })
    }

    /// Never answer once `n` requests have been served.
    pub fn stall_after(&self, n: usize) {
        *self.stall_after.lock().unwrap() = Some(n);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let served = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.clone());
            seen.len() - 1
        };
        let stall = self.stall_after.lock().unwrap().is_some_and(|n| served >= n);
        if stall {
            std::future::pending::<()>().await;
        }
        (self.respond)(&request)
    }
}

// ── FakeFeed ──────────────────────────────────────────────────────────────────

/// Change feed whose streams are driven by the test through [`FakeFeed::emit`].
#[derive(Default)]
pub struct FakeFeed {
    senders: Mutex<Vec<(String, mpsc::Sender<RawChange>)>>,
    pub fail_tables: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<String> {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Deliver a change to every open stream of `table`.
    pub async fn emit(&self, table: &str, kind: ChangeKind, new: Option<Value>, old: Option<Value>) {
        let senders: Vec<_> = self
            .senders
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx
                .send(RawChange {
                    table: table.to_string(),
                    kind,
                    new: new.clone(),
                    old: old.clone(),
                })
                .await;
        }
    }

    /// `true` once every stream of `table` has been dropped.
    pub fn is_closed(&self, table: &str) -> bool {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .all(|(_, tx)| tx.is_closed())
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn open(&self, table: &str) -> Result<ChangeStream> {
        if self.fail_tables.lock().unwrap().iter().any(|t| t == table) {
            return Err(HostelError::Realtime(format!("cannot join {table}")));
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push((table.to_string(), tx));
        Ok(ChangeStream::from_receiver(rx))
    }
}
