//! Notice date parsing
//!
//! Accepted inputs, tried in order:
//!
//! 1. ISO-8601 (`2025-01-15T14:00:00Z`, offsets, or a naive value taken as UTC),
//!    extended or basic (`20250115T140000Z`, `2025-01-15T14:00:00+0000`)
//! 2. `YYYYMMDDhhmm` (12 digits, UTC)
//! 3. `YYMMDDhhmm` (10 digits, UTC, century 2000)
//!
//! `PERM` / `PERMANENT` is not a date but a marker for "no expiration".

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y%m%dT%H%M%S%z", "%Y%m%dT%H%M%z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

/// True for the case-insensitive permanent markers
pub fn is_permanent_marker(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("PERM") || value.eq_ignore_ascii_case("PERMANENT")
}

/// Parse a notice timestamp.
///
/// Returns `None` both for permanent markers and for values matching no
/// supported format; use [`is_permanent_marker`] to tell them apart.
pub fn parse_notice_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || is_permanent_marker(value) {
        return None;
    }

    parse_iso8601(value)
        .or_else(|| parse_compact(value, 12))
        .or_else(|| parse_compact(value, 10))
}

fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = value.strip_suffix(['Z', 'z']).unwrap_or(value);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Fixed-width digit forms: 12 digits carry a full year, 10 digits a two
/// digit year in the 2000s.
fn parse_compact(value: &str, width: usize) -> Option<DateTime<Utc>> {
    if value.len() != width || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let (year, rest) = if width == 12 {
        (value[..4].parse::<i32>().ok()?, &value[4..])
    } else {
        (2000 + value[..2].parse::<i32>().ok()?, &value[2..])
    };
    let field = |i: usize| rest[i..i + 2].parse::<u32>().ok();

    Utc.with_ymd_and_hms(year, field(0)?, field(2)?, field(4)?, field(6)?, 0)
        .single()
}
