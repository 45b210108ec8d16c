//! Wall-clock helpers shared by the sampler, collector, and dataset writers.
//!
//! Timestamps are epoch seconds as `f64` because both feature and power
//! records are joined on sub-second distances across hosts; the ISO form is
//! derived, human-readable, and UTC with millisecond precision.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Format an epoch-seconds timestamp as ISO-8601 UTC with milliseconds.
/// Example: `2026-02-15T01:30:00.250Z`
pub fn format_iso8601(epoch_secs: f64) -> String {
    let clamped = if epoch_secs.is_finite() && epoch_secs > 0.0 {
        epoch_secs
    } else {
        0.0
    };
    let secs = clamped as u64;
    let millis = ((clamped - secs as f64) * 1000.0).round() as u64;
    let (secs, millis) = if millis >= 1000 {
        (secs + 1, 0)
    } else {
        (secs, millis)
    };
    let (year, month, day, hour, min, sec) = secs_to_utc(secs);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year, month, day, hour, min, sec, millis
    )
}

/// Convert seconds since Unix epoch to (year, month, day, hour, minute, second) UTC.
/// Simple implementation — no leap second handling.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;

    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let months_days: [u64; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 0u64;
    for (i, &md) in months_days.iter().enumerate() {
        if days < md {
            month = i as u64 + 1;
            break;
        }
        days -= md;
    }
    let day = days + 1;

    (year, month, day, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
