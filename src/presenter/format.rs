//! Display strings for focus time.

use chrono::{DateTime, FixedOffset, Utc};

use crate::models::Task;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// `MM:SS`. Minutes keep counting past 59; there is no hour field.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// `1h 30m`, `2h` or `45m`; `-` when there is nothing to show.
pub fn format_short_time(seconds: i64) -> String {
    if seconds <= 0 {
        return "-".to_string();
    }
    let hours = seconds / HOUR;
    let minutes = (seconds % HOUR) / MINUTE;
    match (hours, minutes) {
        (0, minutes) => format!("{minutes}m"),
        (hours, 0) => format!("{hours}h"),
        (hours, minutes) => format!("{hours}h {minutes}m"),
    }
}

/// Lifetime totals such as `1y 2mo 3d 4h`. Months are 30 days and years 365.
/// Minutes only appear for totals under an hour; less than a minute is "No data".
pub fn format_total_time(seconds: i64) -> String {
    if seconds < MINUTE {
        return "No data".to_string();
    }
    if seconds < HOUR {
        return format!("{}m", seconds / MINUTE);
    }

    let mut rest = seconds;
    let mut parts = Vec::new();
    for (size, unit) in [(YEAR, "y"), (MONTH, "mo"), (DAY, "d"), (HOUR, "h")] {
        let count = rest / size;
        rest %= size;
        if count > 0 {
            parts.push(format!("{count}{unit}"));
        }
    }
    parts.join(" ")
}

pub fn format_planned_duration(task: &Task) -> String {
    format_short_time(task.planned_duration_secs() as i64)
}

/// `HH:MM` in the given offset.
pub fn hh_mm(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%H:%M").to_string()
}

/// `09:00 - 10:30`.
pub fn format_window(task: &Task, offset: FixedOffset) -> String {
    format!(
        "{} - {}",
        hh_mm(task.start_time, offset),
        hh_mm(task.end_time, offset)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn clock_rolls_minutes_past_an_hour() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(125), "02:05");
        assert_eq!(format_clock(3661), "61:01");
        assert_eq!(format_clock(6000), "100:00");
    }

    #[test]
    fn short_time_variants() {
        assert_eq!(format_short_time(0), "-");
        assert_eq!(format_short_time(-5), "-");
        assert_eq!(format_short_time(45 * 60), "45m");
        assert_eq!(format_short_time(2 * 3600), "2h");
        assert_eq!(format_short_time(5400), "1h 30m");
    }

    #[test]
    fn total_time_uses_calendar_units() {
        assert_eq!(format_total_time(0), "No data");
        assert_eq!(format_total_time(30), "No data");
        assert_eq!(format_total_time(60), "1m");
        assert_eq!(format_total_time(59 * 60), "59m");
        assert_eq!(format_total_time(3600 + 59 * 60), "1h");
        let long = YEAR + 2 * MONTH + 3 * DAY + 4 * HOUR + 5 * MINUTE;
        assert_eq!(format_total_time(long), "1y 2mo 3d 4h");
        assert_eq!(format_total_time(DAY), "1d");
    }

    #[test]
    fn window_in_local_offset() {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let task = Task::new("Review", start, start + Duration::minutes(90));
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();

        assert_eq!(format_window(&task, plus_two), "11:00 - 12:30");
        assert_eq!(format_planned_duration(&task), "1h 30m");
    }
}
