//! Dashboard counters derived from the three mirrored lists.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::{Alert, EntryLog, EntryType, Student};
use crate::time_utils::local_date;

/// Aggregate counters shown on the warden dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_students: usize,
    pub active_students: usize,
    pub today_entries: usize,
    pub today_exits: usize,
    pub pending_alerts: usize,
    pub resolved_alerts: usize,
}

impl DashboardStats {
    /// Compute counters from the current lists.
    ///
    /// "Today" is the calendar day of `now` in `tz`; the entry log list is
    /// usually bounded, so today's counts cover only what it still holds.
    pub fn calculate(
        students: &[Student],
        entry_logs: &[EntryLog],
        alerts: &[Alert],
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        let today = local_date(now, tz);
        let (today_entries, today_exits) = entry_logs
            .iter()
            .filter(|log| local_date(log.timestamp, tz) == today)
            .fold((0, 0), |(entries, exits), log| match log.entry_type {
                EntryType::Entry => (entries + 1, exits),
                EntryType::Exit => (entries, exits + 1),
            });

        let resolved_alerts = alerts.iter().filter(|a| a.is_resolved()).count();

        Self {
            total_students: students.len(),
            active_students: students.iter().filter(|s| s.is_active).count(),
            today_entries,
            today_exits,
            pending_alerts: alerts.len() - resolved_alerts,
            resolved_alerts,
        }
    }
}
