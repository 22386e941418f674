use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Session, SessionStatus};

/// A planned block of time on the daily plan, with its focus ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub sessions: Vec<Session>,
}

impl Task {
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            start_time,
            end_time,
            is_completed: false,
            created_at: start_time,
            sessions: Vec::new(),
        }
    }

    /// `end - start` in seconds; negative windows count as zero.
    pub fn planned_duration_secs(&self) -> u64 {
        (self.end_time - self.start_time).num_seconds().max(0) as u64
    }

    /// Sum over completed and in-progress sessions. Paused sessions are left out
    /// until they resume or complete.
    pub fn total_focused_seconds(&self) -> u64 {
        self.sessions
            .iter()
            .filter(|session| {
                matches!(
                    session.status,
                    SessionStatus::Completed | SessionStatus::InProgress
                )
            })
            .map(|session| session.elapsed_seconds)
            .sum()
    }

    /// `total / planned`, capped at 1.0; 0.0 for an empty window.
    pub fn progress(&self) -> f64 {
        let planned = self.planned_duration_secs();
        if planned == 0 {
            return 0.0;
        }
        (self.total_focused_seconds() as f64 / planned as f64).min(1.0)
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.sessions.iter().find(|session| session.status.is_active())
    }

    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|session| session.id == session_id)
    }

    pub fn is_within_time_slot(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_time && at <= self.end_time
    }
}
