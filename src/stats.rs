//! Focus totals over the session ledger.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{Session, SessionStatus};

pub fn total_focus_seconds(sessions: &[Session]) -> u64 {
    sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Completed)
        .map(|session| session.elapsed_seconds)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTotals {
    /// Monday of the week, in the requested offset.
    pub week_start: NaiveDate,
    /// Monday first.
    pub daily_seconds: [u64; 7],
}

impl WeeklyTotals {
    pub fn total(&self) -> u64 {
        self.daily_seconds.iter().sum()
    }
}

/// Completed focus per day for the week containing `now`, bucketed by the
/// day each session started on in `offset`.
pub fn weekly_totals(sessions: &[Session], now: DateTime<Utc>, offset: FixedOffset) -> WeeklyTotals {
    let today = now.with_timezone(&offset).date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));

    let mut daily_seconds = [0u64; 7];
    for session in sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Completed)
    {
        let day = session.started_at.with_timezone(&offset).date_naive();
        let index = (day - week_start).num_days();
        if (0..7).contains(&index) {
            daily_seconds[index as usize] += session.elapsed_seconds;
        }
    }

    WeeklyTotals {
        week_start,
        daily_seconds,
    }
}
