/// Datetime builtins backed by chrono.
///
/// 'now' resolves to the statement's start time: every call within one
/// statement sees the same instant.
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Result, ZqError};
use crate::types::Value;

/// Accepted argument forms: 'now', a datetime string, or a unix timestamp.
pub fn resolve_instant(value: &Value, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match value.normalized() {
        Value::Text(s) if s.eq_ignore_ascii_case("now") => Ok(now),
        Value::Text(s) => parse_datetime_text(&s).ok_or_else(|| {
            ZqError::Type(format!("cannot interpret '{}' as a datetime", s))
        }),
        Value::Integer(secs) => Ok(Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| ZqError::Type(format!("timestamp {} out of range", secs)))?),
        Value::Real(secs) => Ok(Utc
            .timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| ZqError::Type(format!("timestamp {} out of range", secs)))?),
        other => Err(ZqError::Type(format!(
            "cannot interpret {} as a datetime",
            other
        ))),
    }
}

pub fn parse_datetime_text(s: &str) -> Option<DateTime<Utc>> {
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_datetime(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

pub fn format_time(instant: DateTime<Utc>) -> String {
    instant.format("%H:%M:%S").to_string()
}

/// strftime with chrono's format language; invalid specifiers error rather
/// than panic.
pub fn strftime(format: &str, instant: DateTime<Utc>) -> Result<String> {
    use chrono::format::{Item, StrftimeItems};
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ZqError::Type(format!(
            "invalid strftime format: '{}'",
            format
        )));
    }
    let mut out = String::new();
    use std::fmt::Write;
    write!(
        out,
        "{}",
        instant.format_with_items(items.into_iter())
    )
    .map_err(|_| ZqError::Type(format!("invalid strftime format: '{}'", format)))?;
    Ok(out)
}

/// Julian day number: days since noon UTC, November 24, 4714 BC.
pub fn julian_day(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 / 86400.0 + 2_440_587.5
}

/// ISO weekday helper for tests.
pub fn weekday_sunday_zero(instant: DateTime<Utc>) -> u32 {
    instant.weekday().num_days_from_sunday()
}
