//! Ledger arithmetic kept apart from the orchestration so it can be checked
//! in isolation.

use crate::models::{SessionStatus, Task};

/// This session's own seconds: the timer's cumulative value minus what the
/// task's other completed sessions already account for.
pub fn session_delta(cumulative_elapsed: u64, other_completed_total: u64) -> u64 {
    cumulative_elapsed.saturating_sub(other_completed_total)
}

/// Completed seconds on `task`, leaving out `session_id` when given.
pub fn completed_seconds_excluding(task: &Task, session_id: Option<&str>) -> u64 {
    task.sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Completed)
        .filter(|session| Some(session.id.as_str()) != session_id)
        .map(|session| session.elapsed_seconds)
        .sum()
}
