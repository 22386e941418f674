use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};

use crate::models::{Session, Task};

use super::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    migrations::run_migrations,
    FocusRepository, OwnedSession,
};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

const SESSION_COLUMNS: &str = "id, task_id, started_at, ended_at, elapsed_seconds, status";
const TASK_COLUMNS: &str = "id, title, start_time, end_time, is_completed, created_at";

fn row_to_session(row: &Row) -> Result<OwnedSession> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let elapsed_seconds: i64 = row.get("elapsed_seconds")?;
    let status: String = row.get("status")?;

    Ok(OwnedSession {
        task_id: row.get("task_id")?,
        session: Session {
            id: row.get("id")?,
            started_at: parse_datetime(&started_at, "started_at")?,
            ended_at: parse_optional_datetime(ended_at, "ended_at")?,
            elapsed_seconds: to_u64(elapsed_seconds, "elapsed_seconds")?,
            status: parse_status(&status)?,
        },
    })
}

fn row_to_task(row: &Row) -> Result<Task> {
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        is_completed: row.get("is_completed")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        sessions: Vec::new(),
    })
}

fn query_sessions(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<OwnedSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions {filter} ORDER BY started_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(args)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

/// SQLite-backed ledger. The connection lives on its own worker thread and
/// every call blocks until the worker has answered.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focusjournal-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .recv()
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}

impl FocusRepository for Database {
    fn fetch_active_task_for_now(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let now = format_datetime(&now);
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE start_time <= ?1 AND end_time >= ?1 AND is_completed = 0
                 ORDER BY start_time ASC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![now])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_task(row)?)),
                None => Ok(None),
            }
        })
        .context("failed to fetch the task for now")
    }

    fn fetch_all_sessions_for_task(&self, task_id: &str) -> Result<Vec<Session>> {
        let task_id = task_id.to_string();
        let owned = self
            .execute(move |conn| query_sessions(conn, "WHERE task_id = ?1", params![task_id]))
            .context("failed to fetch task sessions")?;
        Ok(owned.into_iter().map(|owned| owned.session).collect())
    }

    fn fetch_incomplete_sessions(&self) -> Result<Vec<OwnedSession>> {
        self.execute(|conn| {
            query_sessions(
                conn,
                "WHERE status IN ('InProgress', 'Paused')",
                params![],
            )
        })
        .context("failed to fetch incomplete sessions")
    }

    fn fetch_sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>> {
        let since = format_datetime(&since);
        let owned = self
            .execute(move |conn| query_sessions(conn, "WHERE started_at >= ?1", params![since]))
            .context("failed to fetch recent sessions")?;
        Ok(owned.into_iter().map(|owned| owned.session).collect())
    }

    fn insert(&self, task_id: &str, session: &Session) -> Result<()> {
        let task_id = task_id.to_string();
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, task_id, started_at, ended_at, elapsed_seconds, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    task_id,
                    format_datetime(&record.started_at),
                    record.ended_at.as_ref().map(format_datetime),
                    to_i64(record.elapsed_seconds)?,
                    record.status.as_str(),
                ],
            )?;
            Ok(())
        })
        .context("failed to insert session")
    }

    fn save(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions
                 SET ended_at = ?1,
                     elapsed_seconds = ?2,
                     status = ?3
                 WHERE id = ?4",
                params![
                    record.ended_at.as_ref().map(format_datetime),
                    to_i64(record.elapsed_seconds)?,
                    record.status.as_str(),
                    record.id,
                ],
            )?;
            if changed == 0 {
                return Err(anyhow!("session {} not found", record.id));
            }
            Ok(())
        })
        .context("failed to update session")
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(())
        })
        .context("failed to delete session")
    }

    fn insert_task(&self, task: &Task) -> Result<()> {
        let record = task.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tasks (id, title, start_time, end_time, is_completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.title,
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    record.is_completed,
                    format_datetime(&record.created_at),
                ],
            )?;
            for session in &record.sessions {
                tx.execute(
                    "INSERT INTO sessions (id, task_id, started_at, ended_at, elapsed_seconds, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        session.id,
                        record.id,
                        format_datetime(&session.started_at),
                        session.ended_at.as_ref().map(format_datetime),
                        to_i64(session.elapsed_seconds)?,
                        session.status.as_str(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .context("failed to insert task")
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let task_id = task_id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            Ok(())
        })
        .context("failed to delete task")
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        self.execute(|conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY start_time ASC");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(row_to_task(row)?);
            }
            Ok(tasks)
        })
        .context("failed to list tasks")
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

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("ledger").join("focus.sqlite3")).unwrap();
        (dir, db)
    }

    #[test]
    fn creates_parent_directory_and_schema() {
        let (dir, db) = open();
        assert!(db.path().starts_with(dir.path()));
        assert!(db.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn finds_task_for_now() {
        let (_dir, db) = open();
        let morning = Task::new("Morning pages", nine(), nine() + Duration::hours(1));
        let afternoon = Task::new(
            "Deep work",
            nine() + Duration::hours(4),
            nine() + Duration::hours(6),
        );
        db.insert_task(&afternoon).unwrap();
        db.insert_task(&morning).unwrap();

        let found = db
            .fetch_active_task_for_now(nine() + Duration::minutes(10))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, morning.id);
        assert_eq!(found.start_time, morning.start_time);

        assert!(db
            .fetch_active_task_for_now(nine() + Duration::hours(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn session_updates_persist() {
        let (_dir, db) = open();
        let task = Task::new("Study", nine(), nine() + Duration::hours(1));
        db.insert_task(&task).unwrap();

        let mut session = Session::begin(nine());
        db.insert(&task.id, &session).unwrap();
        assert_eq!(db.fetch_incomplete_sessions().unwrap().len(), 1);

        session.elapsed_seconds = 300;
        session.complete(nine() + Duration::minutes(5));
        db.save(&session).unwrap();

        let stored = db.fetch_all_sessions_for_task(&task.id).unwrap();
        assert_eq!(stored, vec![session]);
        assert_eq!(stored[0].status, SessionStatus::Completed);
        assert!(db.fetch_incomplete_sessions().unwrap().is_empty());
    }

    #[test]
    fn saving_unknown_session_fails() {
        let (_dir, db) = open();
        assert!(db.save(&Session::begin(nine())).is_err());
    }

    #[test]
    fn deleting_task_cascades_to_sessions() {
        let (_dir, db) = open();
        let task = Task::new("Plan", nine(), nine() + Duration::hours(1));
        db.insert_task(&task).unwrap();
        db.insert(&task.id, &Session::begin(nine())).unwrap();
        db.insert(&task.id, &Session::begin(nine() + Duration::minutes(2)))
            .unwrap();

        db.delete_task(&task.id).unwrap();

        assert!(db.fetch_sessions_since(nine()).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_single_session() {
        let (_dir, db) = open();
        let task = Task::new("Plan", nine(), nine() + Duration::hours(1));
        db.insert_task(&task).unwrap();
        let keep = Session::begin(nine());
        let drop_me = Session::begin(nine() + Duration::minutes(1));
        db.insert(&task.id, &keep).unwrap();
        db.insert(&task.id, &drop_me).unwrap();

        db.delete(&drop_me.id).unwrap();

        assert_eq!(db.fetch_all_sessions_for_task(&task.id).unwrap(), vec![keep]);
    }
}
