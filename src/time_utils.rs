// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time parsing, formatting and bucket boundaries.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, SecondsFormat, Timelike, Utc};

/// Timestamp layout used by the export tool, e.g. `2025-12-08 00:12:43 +0100`.
const EXPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an export timestamp, keeping the device's UTC offset.
///
/// Accepts the export tool's `YYYY-MM-DD HH:MM:SS ±HHMM` layout, RFC3339, and
/// a bare `YYYY-MM-DD HH:MM:SS` which is taken to be UTC.
pub fn parse_export_local(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_str(raw, EXPORT_FORMAT) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    raw.get(..19)
        .and_then(|prefix| NaiveDateTime::parse_from_str(prefix, NAIVE_FORMAT).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Fixed offset from a count of seconds east of UTC, UTC when out of range.
pub fn offset_east(secs: i32) -> FixedOffset {
    FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix())
}

/// Truncate to the start of the containing local hour.
pub fn truncate_to_hour(ts: DateTime<FixedOffset>) -> DateTime<Utc> {
    ts.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(ts)
        .with_timezone(&Utc)
}

/// Truncate to local midnight of the containing day.
pub fn truncate_to_day(ts: DateTime<FixedOffset>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(*ts.offset()).single())
        .unwrap_or(ts)
        .with_timezone(&Utc)
}

/// Convert a whole number of hours from config into a chrono duration.
///
/// Saturates at the largest duration chrono can represent.
pub fn hours(n: u64) -> Duration {
    i64::try_from(n)
        .ok()
        .and_then(|n| n.checked_mul(3600))
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse_export_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        parse_export_local(raw).map(|dt| dt.with_timezone(&Utc))
    }

    #[test]
    fn parses_export_format_with_offset() {
        let ts = parse_export_timestamp("2025-12-08 00:12:43 +0100").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 12, 7, 23, 12, 43).unwrap());
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_export_timestamp("2025-12-08T10:15:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 12, 8, 10, 15, 0).unwrap());
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let ts = parse_export_timestamp("2025-12-08 10:15:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 12, 8, 10, 15, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_export_timestamp("").is_none());
        assert!(parse_export_timestamp("yesterday").is_none());
        assert!(parse_export_timestamp("2025-13-40 99:00:00").is_none());
    }

    #[test]
    fn keeps_device_offset() {
        let ts = parse_export_local("2025-12-08 00:12:43 +0100").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 3600);
        assert_eq!(offset_east(3600), *ts.offset());
        assert_eq!(offset_east(i32::MAX), Utc.fix());
    }

    #[test]
    fn truncation_boundaries() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 10, 45, 12).unwrap().fixed_offset();
        assert_eq!(
            truncate_to_hour(ts),
            Utc.with_ymd_and_hms(2025, 12, 8, 10, 0, 0).unwrap()
        );
        assert_eq!(
            truncate_to_day(ts),
            Utc.with_ymd_and_hms(2025, 12, 8, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn day_follows_local_midnight() {
        // 00:30 on the 8th in +0100 is 23:30 UTC on the 7th
        let ts = parse_export_local("2025-12-08 00:30:00 +0100").unwrap();
        assert_eq!(
            truncate_to_day(ts),
            Utc.with_ymd_and_hms(2025, 12, 7, 23, 0, 0).unwrap()
        );

        let half = parse_export_local("2025-12-08 10:45:00 +0530").unwrap();
        assert_eq!(
            truncate_to_hour(half),
            Utc.with_ymd_and_hms(2025, 12, 8, 4, 30, 0).unwrap()
        );
    }

    #[test]
    fn oversized_hours_saturate() {
        assert_eq!(hours(48), Duration::hours(48));
        assert_eq!(hours(10_000_000_000_000), Duration::MAX);
        assert_eq!(hours(u64::MAX), Duration::MAX);
    }

    #[test]
    fn formats_with_z_suffix() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 8, 10, 0, 0).unwrap();
        assert_eq!(format_utc_rfc3339(ts), "2025-12-08T10:00:00Z");
    }
}
