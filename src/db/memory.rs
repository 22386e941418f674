use std::cell::{Cell, RefCell};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};

use crate::models::{Session, Task};

use super::{FocusRepository, OwnedSession};

/// Ledger kept in memory. Failures can be switched on to exercise error paths.
#[derive(Default)]
pub struct InMemoryRepository {
    tasks: RefCell<Vec<Task>>,
    fail_writes: Cell<bool>,
    fail_reads: Cell<bool>,
    write_count: Cell<usize>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    /// Successful insert/save/delete calls so far.
    pub fn write_count(&self) -> usize {
        self.write_count.get()
    }

    /// Stored state of one task, sessions included.
    pub fn stored_task(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .borrow()
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.get() {
            bail!("store is read-only");
        }
        self.write_count.set(self.write_count.get() + 1);
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.get() {
            bail!("store is unavailable");
        }
        Ok(())
    }

    fn all_sessions(&self) -> Vec<OwnedSession> {
        self.tasks
            .borrow()
            .iter()
            .flat_map(|task| {
                task.sessions.iter().map(|session| OwnedSession {
                    task_id: task.id.clone(),
                    session: session.clone(),
                })
            })
            .collect()
    }
}

fn without_sessions(task: &Task) -> Task {
    Task {
        sessions: Vec::new(),
        ..task.clone()
    }
}

impl FocusRepository for InMemoryRepository {
    fn fetch_active_task_for_now(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        self.check_read()?;
        Ok(self
            .tasks
            .borrow()
            .iter()
            .filter(|task| !task.is_completed && task.is_within_time_slot(now))
            .min_by_key(|task| task.start_time)
            .map(without_sessions))
    }

    fn fetch_all_sessions_for_task(&self, task_id: &str) -> Result<Vec<Session>> {
        self.check_read()?;
        let tasks = self.tasks.borrow();
        let task = tasks
            .iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| anyhow!("task {task_id} not found"))?;
        let mut sessions = task.sessions.clone();
        sessions.sort_by_key(|session| session.started_at);
        Ok(sessions)
    }

    fn fetch_incomplete_sessions(&self) -> Result<Vec<OwnedSession>> {
        self.check_read()?;
        Ok(self
            .all_sessions()
            .into_iter()
            .filter(|owned| owned.session.status.is_active())
            .collect())
    }

    fn fetch_sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>> {
        self.check_read()?;
        Ok(self
            .all_sessions()
            .into_iter()
            .map(|owned| owned.session)
            .filter(|session| session.started_at >= since)
            .collect())
    }

    fn insert(&self, task_id: &str, session: &Session) -> Result<()> {
        self.check_write()?;
        let mut tasks = self.tasks.borrow_mut();
        if tasks
            .iter()
            .any(|task| task.sessions.iter().any(|s| s.id == session.id))
        {
            bail!("session {} already exists", session.id);
        }
        let task = tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| anyhow!("task {task_id} not found"))?;
        task.sessions.push(session.clone());
        Ok(())
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.check_write()?;
        let mut tasks = self.tasks.borrow_mut();
        let stored = tasks
            .iter_mut()
            .find_map(|task| task.session_mut(&session.id))
            .ok_or_else(|| anyhow!("session {} not found", session.id))?;
        *stored = session.clone();
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        self.check_write()?;
        for task in self.tasks.borrow_mut().iter_mut() {
            task.sessions.retain(|session| session.id != session_id);
        }
        Ok(())
    }

    fn insert_task(&self, task: &Task) -> Result<()> {
        self.check_write()?;
        let mut tasks = self.tasks.borrow_mut();
        if tasks.iter().any(|existing| existing.id == task.id) {
            bail!("task {} already exists", task.id);
        }
        tasks.push(task.clone());
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        self.check_write()?;
        self.tasks.borrow_mut().retain(|task| task.id != task_id);
        Ok(())
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        self.check_read()?;
        let mut tasks: Vec<Task> = self.tasks.borrow().iter().map(without_sessions).collect();
        tasks.sort_by_key(|task| task.start_time);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use chrono::{Duration, TimeZone};

    fn nine() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn active_task_picks_earliest_open_window() {
        let repo = InMemoryRepository::new();
        let later = Task::new("Later", nine() + Duration::minutes(30), nine() + Duration::hours(2));
        let earlier = Task::new("Earlier", nine(), nine() + Duration::hours(1));
        let mut done = Task::new("Done", nine() - Duration::hours(1), nine() + Duration::hours(3));
        done.is_completed = true;
        repo.insert_task(&later).unwrap();
        repo.insert_task(&earlier).unwrap();
        repo.insert_task(&done).unwrap();

        let found = repo
            .fetch_active_task_for_now(nine() + Duration::minutes(45))
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "Earlier");

        assert!(repo
            .fetch_active_task_for_now(nine() + Duration::hours(5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn session_round_trip_and_cascade() {
        let repo = InMemoryRepository::new();
        let task = Task::new("Read", nine(), nine() + Duration::hours(1));
        repo.insert_task(&task).unwrap();

        let mut session = Session::begin(nine());
        repo.insert(&task.id, &session).unwrap();
        assert!(repo.insert(&task.id, &session).is_err());

        session.elapsed_seconds = 90;
        session.complete(nine() + Duration::seconds(90));
        repo.save(&session).unwrap();

        let sessions = repo.fetch_all_sessions_for_task(&task.id).unwrap();
        assert_eq!(sessions, vec![session.clone()]);
        assert_eq!(sessions[0].status, SessionStatus::Completed);

        repo.delete_task(&task.id).unwrap();
        assert!(repo.fetch_sessions_since(nine()).unwrap().is_empty());
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let repo = InMemoryRepository::new();
        let task = Task::new("Write", nine(), nine() + Duration::hours(1));
        repo.insert_task(&task).unwrap();

        repo.fail_writes(true);
        assert!(repo.insert(&task.id, &Session::begin(nine())).is_err());
        repo.fail_reads(true);
        assert!(repo.fetch_active_task_for_now(nine()).is_err());
        assert_eq!(repo.write_count(), 1);
    }
}
