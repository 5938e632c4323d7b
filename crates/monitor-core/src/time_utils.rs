use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use serde_json::Value;

use crate::error::{MonitorError, Result};

// ── Calendar dates ────────────────────────────────────────────────────────────

/// Parse a `YYYY-MM-DD` analysis date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| MonitorError::InvalidDate(s.to_string()))
}

/// Today's date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// The same weekday `days` days earlier.
pub fn prior_period(date: NaiveDate, days: i64) -> NaiveDate {
    date - TimeDelta::days(days)
}

/// The UTC instant `time` on `date`.
pub fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

// ── Weekdays ──────────────────────────────────────────────────────────────────

/// English weekday name as it appears in profile documents.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parse a weekday cell: full or three-letter English names, any case.
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    s.trim().trim_matches('*').trim().parse::<Weekday>().ok()
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// Parse a JSON timestamp value into UTC.
///
/// Strings go through [`parse_timestamp`]; numbers are Unix seconds.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let f = n.as_f64()?;
                let secs = f.trunc() as i64;
                let nanos = (f.fract() * 1_000_000_000.0).round() as u32;
                DateTime::from_timestamp(secs, nanos)
            }
        }
        _ => None,
    }
}

/// Parse an ISO 8601 / RFC 3339 timestamp string into UTC.
///
/// Naive timestamps (no offset) are interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let normalised = match s.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
        return Some(dt.with_timezone(&Utc));
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%:z",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(at_time(date, NaiveTime::MIN));
    }

    None
}
