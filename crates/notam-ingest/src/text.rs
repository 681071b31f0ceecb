//! Legacy ICAO tagged-text path.
//!
//! ```text
//! A2/1234 NOTAMN
//! Q) KZNY/QMRLC/IV/NBO/A/000/999/4038N07346W005
//! A) KJFK B) 2501151400 C) 2501202359 EST
//! E) RWY 04L/22R CLSD
//!    DUE TO MAINT
//! ```
//!
//! Identifier, `A)` and `B)` are required. Untagged lines following `E)` are
//! body continuations.

use std::sync::LazyLock;

use notam_common::{Notice, NoticeFormat, Qualifier};
use regex::Regex;
use tracing::debug;

use crate::dates::{is_permanent_marker, parse_notice_date};
use crate::error::ParseFailure;

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)([A-GQ])\)").expect("tag pattern is valid"));

#[allow(clippy::expect_used)]
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\d+/\d+").expect("identifier pattern is valid"));

/// Parse a tagged-text payload into a notice
pub fn parse_text(raw: &[u8]) -> Result<Notice, ParseFailure> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = TextFields::default();
    let mut in_body = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(segments) = tagged_segments(line) {
            for (tag, value) in segments {
                in_body = tag == 'E';
                fields.assign(tag, value);
            }
        } else if in_body {
            fields.continue_body(line);
        } else if fields.identifier.is_none() {
            // ICAO messages may open with a parenthesis: `(A0417/25 NOTAMN`
            if let Some(m) = IDENTIFIER.find(line.trim_start_matches('(')) {
                fields.identifier = Some(m.as_str().to_string());
            }
        }
    }

    fields.into_notice(raw)
}

/// Split a line into `(tag, value)` pairs, or `None` when it does not start
/// with a tag. Everything after `E)` belongs to the body, tags included.
fn tagged_segments(line: &str) -> Option<Vec<(char, &str)>> {
    let tags: Vec<(char, usize, usize)> = TAG
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let tag = caps.get(1)?.as_str().chars().next()?;
            Some((tag, whole.start(), whole.end()))
        })
        .collect();

    if tags.first().map(|&(_, start, _)| start) != Some(0) {
        return None;
    }

    let mut segments = Vec::with_capacity(tags.len());
    for (i, &(tag, _, value_start)) in tags.iter().enumerate() {
        let value_end = match tags.get(i + 1) {
            Some(&(_, next_start, _)) if tag != 'E' => next_start,
            _ => line.len(),
        };
        segments.push((tag, line[value_start..value_end].trim()));
        if tag == 'E' {
            break;
        }
    }
    Some(segments)
}

#[derive(Default)]
struct TextFields {
    identifier: Option<String>,
    location: Option<String>,
    start: Option<String>,
    end: Option<String>,
    schedule: Option<String>,
    body: Option<String>,
    qualifier: Option<Qualifier>,
}

impl TextFields {
    fn assign(&mut self, tag: char, value: &str) {
        let present = (!value.is_empty()).then(|| value.to_string());
        match tag {
            'A' => self.location = present,
            'B' => self.start = present,
            'C' => self.end = present,
            'D' => self.schedule = present,
            'E' => self.body = Some(value.to_string()),
            'Q' => self.qualifier = parse_qualifier(value),
            // F) and G) carry vertical limits already covered by Q)
            _ => {},
        }
    }

    fn continue_body(&mut self, line: &str) {
        let body = self.body.get_or_insert_with(String::new);
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(line);
    }

    fn into_notice(self, raw: &[u8]) -> Result<Notice, ParseFailure> {
        let (identifier, location, start_raw) = match (self.identifier, self.location, self.start)
        {
            (Some(id), Some(loc), Some(start)) => (id, loc, start),
            (id, loc, start) => {
                let missing: Vec<&str> = [
                    (id.is_none(), "identifier"),
                    (loc.is_none(), "A)"),
                    (start.is_none(), "B)"),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                return Err(ParseFailure::TextMissingRequiredLines(missing.join(", ")));
            },
        };

        let start = parse_notice_date(&start_raw).ok_or(ParseFailure::DateUnparseable {
            field: "B)",
            value: start_raw.clone(),
        })?;
        let end = self.end.as_deref().and_then(|value| end_date(&identifier, value));

        Ok(Notice::builder(identifier, location, start, NoticeFormat::Text)
            .effective_end(end)
            .schedule(self.schedule)
            .body(self.body.unwrap_or_default())
            .qualifier(self.qualifier)
            .raw_payload(raw)
            .build())
    }
}

fn end_date(identifier: &str, value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    // Estimated end times are stored as if firm
    let value = value.strip_suffix("EST").map(str::trim_end).unwrap_or(value);
    if is_permanent_marker(value) {
        return None;
    }
    let parsed = parse_notice_date(value);
    if parsed.is_none() {
        debug!(
            identifier,
            value,
            category = "date-unparseable",
            "Treating unparseable C) as permanent"
        );
    }
    parsed
}

/// `FIR/CODE/TRAFFIC/PURPOSE/SCOPE/LOWER/UPPER/COORDS[RADIUS]`
fn parse_qualifier(value: &str) -> Option<Qualifier> {
    let mut parts = value
        .split('/')
        .map(str::trim)
        .map(|p| (!p.is_empty()).then(|| p.to_string()));
    let mut next = || parts.next().flatten();

    let fir = next();
    let code = next();
    let traffic = next();
    let purpose = next();
    let scope = next();
    let lower_fl = next().and_then(|v| v.parse().ok());
    let upper_fl = next().and_then(|v| v.parse().ok());
    let (coordinates, radius_nm) = match next() {
        Some(area) => split_radius(area),
        None => (None, None),
    };

    let qualifier = Qualifier {
        fir,
        code,
        traffic,
        purpose,
        scope,
        lower_fl,
        upper_fl,
        coordinates,
        radius_nm,
    };
    (!qualifier.is_empty()).then_some(qualifier)
}

/// `4038N07346W005` -> (`4038N07346W`, 5)
fn split_radius(area: String) -> (Option<String>, Option<u32>) {
    let bytes = area.as_bytes();
    let n = bytes.len();
    if area.is_ascii()
        && n > 4
        && bytes[n - 3..].iter().all(u8::is_ascii_digit)
        && matches!(bytes[n - 4], b'E' | b'W')
    {
        let radius = area[n - 3..].parse().ok();
        (Some(area[..n - 3].to_string()), radius)
    } else {
        (Some(area), None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_basic_notice() {
        let notice =
            parse_text(b"A2/1234\nA) KJFK\nB) 2501151400\nC) 2501202359\nE) RWY 04L/22R CLSD")
                .unwrap();
        assert_eq!(notice.identifier, "A2/1234");
        assert_eq!(notice.location, "KJFK");
        assert_eq!(notice.body, "RWY 04L/22R CLSD");
        assert_eq!(notice.effective_start, Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap());
        assert_eq!(
            notice.effective_end,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 23, 59, 0).unwrap())
        );
        assert_eq!(notice.source_format, NoticeFormat::Text);
        assert!(notice.qualifier.is_none());
    }

    #[test]
    fn test_several_tags_on_one_line() {
        let notice = parse_text(
            b"B0417/25 NOTAMR B0301/25\nA) EGLL B) 2503010600 C) 2503312000 EST\nD) DAILY 0600-2000\nE) TWY A) CLSD\n   BTN HOLD A1 AND A2",
        )
        .unwrap();
        assert_eq!(notice.identifier, "B0417/25");
        assert_eq!(notice.location, "EGLL");
        assert_eq!(notice.schedule.as_deref(), Some("DAILY 0600-2000"));
        assert_eq!(notice.body, "TWY A) CLSD\nBTN HOLD A1 AND A2");
        assert_eq!(
            notice.effective_end,
            Some(Utc.with_ymd_and_hms(2025, 3, 31, 20, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_perm_end() {
        let notice = parse_text(b"A7/2025\nA) KBOS\nB) 2501010000\nC) PERM\nE) OBST LGT U/S").unwrap();
        assert!(notice.is_permanent());
    }

    #[test]
    fn test_qualifier_line() {
        let notice = parse_text(
            b"A2/1234\nQ) KZNY/QMRLC/IV/NBO/A/000/999/4038N07346W005\nA) KJFK\nB) 2501151400\nE) RWY CLSD",
        )
        .unwrap();
        let q = notice.qualifier.unwrap();
        assert_eq!(q.fir.as_deref(), Some("KZNY"));
        assert_eq!(q.code.as_deref(), Some("QMRLC"));
        assert_eq!(q.traffic.as_deref(), Some("IV"));
        assert_eq!(q.upper_fl, Some(999));
        assert_eq!(q.coordinates.as_deref(), Some("4038N07346W"));
        assert_eq!(q.radius_nm, Some(5));
        // Top-level scalars are not derived from the qualifier
        assert!(notice.purpose.is_none());
    }

    #[test]
    fn test_missing_required_lines() {
        for raw in [
            &b"A) KJFK\nB) 2501151400\nE) X"[..],
            b"A2/1234\nB) 2501151400\nE) X",
            b"A2/1234\nA) KJFK\nE) X",
            b"",
        ] {
            let err = parse_text(raw).unwrap_err();
            assert_eq!(err.category(), "text-missing-required-lines");
        }
    }

    #[test]
    fn test_unparseable_start() {
        let err = parse_text(b"A2/1234\nA) KJFK\nB) WIE\nE) X").unwrap_err();
        assert_eq!(err.category(), "date-unparseable");
    }

    #[test]
    fn test_first_identifier_wins() {
        let notice = parse_text(b"A2/1234\nB9/99\nA) KJFK\nB) 2501151400").unwrap();
        assert_eq!(notice.identifier, "A2/1234");
        assert_eq!(notice.body, "");
    }

    #[test]
    fn test_split_radius_leaves_other_shapes() {
        assert_eq!(split_radius("5129N00028W".into()), (Some("5129N00028W".into()), None));
        assert_eq!(split_radius("123".into()), (Some("123".into()), None));
    }
}
