//! Timing constants for token refresh and outbound fetches.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hostel_core::models::Session;

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Refresh as soon as less than this much lifetime remains.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Regular refresh cadence, inside the usual 60 minute token lifetime.
pub const DEFAULT_REFRESH_CADENCE: Duration = Duration::from_secs(50 * 60);

/// Floor between two proactive refreshes when the server keeps issuing
/// tokens that are already inside the safety margin.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_LOGOUT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: u64 = 100;

// ── RefreshPolicy ─────────────────────────────────────────────────────────────

/// When the proactive refresh should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    Immediate,
    After(Duration),
}

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub safety_margin: Duration,
    pub cadence: Duration,
    pub min_interval: Duration,
    pub logout_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
            cadence: DEFAULT_REFRESH_CADENCE,
            min_interval: MIN_REFRESH_INTERVAL,
            logout_timeout: DEFAULT_LOGOUT_TIMEOUT,
        }
    }
}

impl RefreshPolicy {
    /// `true` once less than the safety margin is left before `expires_at`.
    pub fn is_due(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        remaining(expires_at, now) < self.safety_margin
    }

    pub fn session_is_due(&self, session: &Session, now: DateTime<Utc>) -> bool {
        self.is_due(session.expires_at, now)
    }

    /// Plan the next proactive refresh.
    ///
    /// Inside the margin: now. Otherwise at the regular cadence, brought
    /// forward so it always lands before the margin is entered.
    pub fn plan(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> RefreshPlan {
        let left = remaining(expires_at, now);
        if left < self.safety_margin {
            RefreshPlan::Immediate
        } else {
            RefreshPlan::After(self.cadence.min(left - self.safety_margin))
        }
    }
}

/// Time left before `expires_at`, zero once it has passed.
fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

// ── FetchPolicy ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub request_timeout: Duration,
    pub page_timeout: Duration,
    pub page_size: u64,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            retry_attempts: hostel_data::retry::DEFAULT_MAX_ATTEMPTS,
            retry_delay: hostel_data::retry::DEFAULT_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn test_due_inside_margin_only() {
        let policy = RefreshPolicy::default();
        assert!(policy.is_due(now() + minutes(4), now()));
        assert!(!policy.is_due(now() + minutes(6), now()));
        assert!(policy.is_due(now() - minutes(1), now()));
    }

    #[test]
    fn test_plan_uses_cadence_for_fresh_tokens() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.plan(now() + minutes(60), now()),
            RefreshPlan::After(Duration::from_secs(50 * 60))
        );
    }

    #[test]
    fn test_plan_brings_short_tokens_forward() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.plan(now() + minutes(20), now()),
            RefreshPlan::After(Duration::from_secs(15 * 60))
        );
        assert_eq!(
            policy.plan(now() + minutes(6), now()),
            RefreshPlan::After(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_plan_is_immediate_inside_margin() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.plan(now() + minutes(4), now()), RefreshPlan::Immediate);
        assert_eq!(policy.plan(now() - minutes(10), now()), RefreshPlan::Immediate);
    }
}
