//! Background task behind [`SessionManager::schedule_proactive_refresh`].
//!
//! The task watches the auth state. For every session it sees it arms one
//! timer from [`RefreshPolicy::plan`]; a session change re-plans, and a
//! cleared session ends the task. It holds only a weak reference so it never
//! keeps the manager alive.
//!
//! [`SessionManager::schedule_proactive_refresh`]: crate::session_manager::SessionManager::schedule_proactive_refresh

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;

use crate::policy::{RefreshPlan, RefreshPolicy};
use crate::session_manager::{AuthState, SessionManager};

pub(crate) async fn run(
    manager: Weak<SessionManager>,
    mut state: watch::Receiver<AuthState>,
    policy: RefreshPolicy,
) {
    let mut just_refreshed = false;

    loop {
        let (expires_at, generation) = {
            let current = state.borrow_and_update();
            match &current.session {
                Some(session) => (session.expires_at, current.generation),
                None => {
                    tracing::debug!("no session; proactive refresh stopped");
                    return;
                }
            }
        };

        let Some(now) = manager.upgrade().map(|m| m.clock().now()) else {
            return;
        };
        let delay = match policy.plan(expires_at, now) {
            RefreshPlan::Immediate if just_refreshed => policy.min_interval,
            RefreshPlan::Immediate => Duration::ZERO,
            RefreshPlan::After(delay) => delay,
        };
        tracing::debug!(delay_secs = delay.as_secs(), "proactive refresh armed");

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                just_refreshed = false;
                continue;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(strong) = manager.upgrade() else {
            return;
        };
        match strong.refresh_from(generation).await {
            Ok(_) => just_refreshed = true,
            Err(e) => {
                tracing::debug!(error = %e, "proactive refresh did not complete");
                just_refreshed = false;
            }
        }
    }
}
