use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Session, Task};

/// A session together with the task that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedSession {
    pub task_id: String,
    pub session: Session,
}

/// Storage for tasks and their session ledger.
///
/// Tasks come back without sessions; `fetch_all_sessions_for_task` loads the
/// ledger separately. Deleting a task deletes its sessions.
pub trait FocusRepository {
    /// The earliest-starting, not completed task whose window contains `now`.
    fn fetch_active_task_for_now(&self, now: DateTime<Utc>) -> Result<Option<Task>>;

    fn fetch_all_sessions_for_task(&self, task_id: &str) -> Result<Vec<Session>>;

    /// Sessions still marked in progress or paused, across all tasks.
    fn fetch_incomplete_sessions(&self) -> Result<Vec<OwnedSession>>;

    /// Sessions that started at or after `since`, across all tasks.
    fn fetch_sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>>;

    fn insert(&self, task_id: &str, session: &Session) -> Result<()>;

    /// Writes the current state of an already inserted session.
    fn save(&self, session: &Session) -> Result<()>;

    fn delete(&self, session_id: &str) -> Result<()>;

    fn insert_task(&self, task: &Task) -> Result<()>;

    fn delete_task(&self, task_id: &str) -> Result<()>;

    fn list_tasks(&self) -> Result<Vec<Task>>;
}
