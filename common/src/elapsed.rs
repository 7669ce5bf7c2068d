use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;

/// Seconds are shown as-is up to this many before being split into minutes.
const SECONDS_BEFORE_MINUTES: i64 = 300;
/// Minutes are shown as-is up to this many before being split into hours.
const MINUTES_BEFORE_HOURS: i64 = 60;
/// Hours are shown as-is up to this many before being split into days.
const HOURS_BEFORE_DAYS: i64 = 96;

/// Returns the time elapsed since `start_time` rendered like `42s` or
/// `5m 1s`. See [`format_duration`].
pub fn format_elapsed(start_time: DateTime<Utc>) -> String {
    format_duration(Utc::now().signed_duration_since(start_time))
}

/// Renders a duration with whole-second precision.
///
/// A unit only "rolls over" into the next one past a generous threshold, so
/// short runs read as `299s` rather than `4m 59s`, and a unit is printed
/// only once a higher unit is non-zero.
pub fn format_duration(elapsed: TimeDelta) -> String {
    let mut remaining = elapsed.num_seconds().max(0);

    let seconds = if remaining <= SECONDS_BEFORE_MINUTES {
        remaining
    } else {
        remaining % 60
    };
    remaining = (remaining - seconds) / 60;

    let minutes = if remaining <= MINUTES_BEFORE_HOURS {
        remaining
    } else {
        remaining % 60
    };
    remaining = (remaining - minutes) / 60;

    let hours = if remaining <= HOURS_BEFORE_DAYS {
        remaining
    } else {
        remaining % 24
    };
    let days = (remaining - hours) / 24;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
