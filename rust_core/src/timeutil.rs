//! Wall-clock helpers for minute-aligned publishing and cache keys.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;

/// Floor a Unix timestamp (seconds) to the start of its minute.
pub fn floor_to_minute(ts: i64) -> i64 {
    ts.div_euclid(60) * 60
}

/// Current Unix time floored to the minute.
pub fn now_floored_minute() -> i64 {
    floor_to_minute(Utc::now().timestamp())
}

/// How long to sleep so the next action lands on a wall-clock minute boundary.
pub fn until_next_minute() -> Duration {
    let now = Utc::now();
    let next = (now + ChronoDuration::minutes(1))
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Render a Unix timestamp as ISO-8601 for log lines.
pub fn unix_to_iso(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("<invalid ts {ts}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_minute() {
        assert_eq!(floor_to_minute(1643644859), 1643644800);
        assert_eq!(floor_to_minute(1643644800), 1643644800);
        assert_eq!(floor_to_minute(59), 0);
        assert_eq!(floor_to_minute(60), 60);
    }

    #[test]
    fn test_until_next_minute_bounded() {
        let wait = until_next_minute();
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_unix_to_iso() {
        assert_eq!(unix_to_iso(1643644800), "2022-01-31T15:20:00+00:00");
    }
}
