use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    InProgress,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "InProgress",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
        }
    }

    /// In progress or paused: the session still belongs to a running focus run.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::InProgress | SessionStatus::Paused)
    }
}

/// One stretch of focused work against a task.
///
/// `elapsed_seconds` is this session's own contribution, never the task's
/// running total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub status: SessionStatus,
}

impl Session {
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            ended_at: None,
            elapsed_seconds: 0,
            status: SessionStatus::InProgress,
        }
    }

    /// Returns false when the session is already completed.
    pub fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Completed {
            return false;
        }
        self.ended_at = Some(at);
        self.status = SessionStatus::Completed;
        true
    }

    /// Only valid from in-progress.
    pub fn pause(&mut self) -> bool {
        if self.status != SessionStatus::InProgress {
            return false;
        }
        self.status = SessionStatus::Paused;
        true
    }

    /// Only valid from paused.
    pub fn resume(&mut self) -> bool {
        if self.status != SessionStatus::Paused {
            return false;
        }
        self.status = SessionStatus::InProgress;
        true
    }
}
