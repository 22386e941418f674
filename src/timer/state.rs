use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl TimerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Idle => "idle",
            TimerState::Running => "running",
            TimerState::Paused => "paused",
        }
    }
}

/// Stopwatch bookkeeping driven purely by wall-clock timestamps.
///
/// While running, elapsed time is `accumulated_seconds + (now - started_at)`;
/// otherwise it is `accumulated_seconds`. Nothing here counts ticks, so a
/// process that was suspended for an hour still reads the right value on its
/// next look at the clock.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub status: TimerState,
    pub elapsed_seconds: u64,
    /// Time banked by earlier running windows (and the starting offset).
    #[serde(skip)]
    pub accumulated_seconds: u64,
    /// Start of the current running window.
    #[serde(skip)]
    pub started_at: Option<DateTime<Utc>>,
}

impl ClockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_elapsed(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.started_at) {
            (TimerState::Running, Some(anchor)) => {
                // A clock that jumped backwards never takes banked time away.
                let window = (now - anchor).num_seconds().max(0) as u64;
                self.accumulated_seconds.saturating_add(window)
            }
            _ => self.accumulated_seconds,
        }
    }

    pub fn sync_elapsed(&mut self, now: DateTime<Utc>) -> u64 {
        self.elapsed_seconds = self.current_elapsed(now);
        self.elapsed_seconds
    }

    pub fn begin(&mut self, initial_seconds: u64, now: DateTime<Utc>) {
        *self = Self {
            status: TimerState::Running,
            elapsed_seconds: initial_seconds,
            accumulated_seconds: initial_seconds,
            started_at: Some(now),
        };
    }

    /// Banks the running window and stops the anchor.
    pub fn freeze(&mut self, now: DateTime<Utc>) {
        self.sync_elapsed(now);
        self.accumulated_seconds = self.elapsed_seconds;
        self.started_at = None;
        self.status = TimerState::Paused;
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.status = TimerState::Running;
    }

    /// Returns the final elapsed value and clears everything.
    pub fn finish(&mut self, now: DateTime<Utc>) -> u64 {
        let total = self.sync_elapsed(now);
        self.reset();
        total
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn running_elapsed_follows_wall_clock() {
        let mut state = ClockState::new();
        state.begin(30, t0());

        assert_eq!(state.current_elapsed(t0()), 30);
        assert_eq!(state.current_elapsed(t0() + Duration::seconds(95)), 125);
    }

    #[test]
    fn freeze_banks_window_and_resume_continues() {
        let mut state = ClockState::new();
        state.begin(0, t0());
        state.freeze(t0() + Duration::seconds(40));

        assert_eq!(state.status, TimerState::Paused);
        assert_eq!(state.accumulated_seconds, 40);
        // Time passing while paused does not count.
        assert_eq!(state.current_elapsed(t0() + Duration::seconds(400)), 40);

        state.resume(t0() + Duration::seconds(400));
        assert_eq!(state.current_elapsed(t0() + Duration::seconds(410)), 50);
    }

    #[test]
    fn finish_returns_total_and_clears() {
        let mut state = ClockState::new();
        state.begin(350, t0());
        let total = state.finish(t0() + Duration::seconds(80));

        assert_eq!(total, 430);
        assert_eq!(state, ClockState::default());
    }

    #[test]
    fn backwards_clock_never_subtracts() {
        let mut state = ClockState::new();
        state.begin(10, t0());
        assert_eq!(state.current_elapsed(t0() - Duration::seconds(30)), 10);
    }
}
