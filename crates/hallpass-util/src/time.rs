//! Time helpers for hallpassd
//!
//! Checkout deadlines are wall-clock times persisted alongside the
//! reservation, so overdue detection keeps working across daemon restarts.
//! Audit durations are whole minutes, floored, never negative.

use chrono::{DateTime, Duration, Local};

/// Get the current local time.
///
/// Engine operations take a timestamp argument instead of calling this
/// directly, so scenario tests can pin the clock. The daemon and tests
/// are the call sites.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Compute the return deadline for a checkout starting at `start`.
pub fn deadline_after(start: DateTime<Local>, minutes: u32) -> DateTime<Local> {
    start + Duration::minutes(minutes as i64)
}

/// Elapsed whole minutes from `start` to `end`, floored.
///
/// A clock that went backwards between the two reads yields 0, never a
/// negative duration.
pub fn whole_minutes_between(start: DateTime<Local>, end: DateTime<Local>) -> i64 {
    let seconds = end.signed_duration_since(start).num_seconds();
    if seconds <= 0 { 0 } else { seconds / 60 }
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format just the wall-clock time, for user-facing messages
/// ("due back by 10:12 AM").
pub fn format_clock_time(dt: &DateTime<Local>) -> String {
    dt.format("%-I:%M %p").to_string()
}
