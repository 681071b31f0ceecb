//! AIXM 5.1 event message extraction.
//!
//! Section chain, each step tolerating a missing namespace prefix:
//!
//! ```text
//! AIXMBasicMessage > hasMember > Event > timeSlice > EventTimeSlice > textNOTAM > NOTAM
//! ```
//!
//! A missing section aborts the parse; missing optional fields only blank
//! that field.

use chrono::{DateTime, Utc};
use notam_common::{Notice, NoticeFormat, Qualifier};
use tracing::debug;

use super::tree::XmlNode;
use crate::dates::{is_permanent_marker, parse_notice_date};
use crate::error::ParseFailure;

// ============================================================================
// Sections
// ============================================================================

const ROOT: &[&str] = &["message:AIXMBasicMessage", "AIXMBasicMessage"];
const HAS_MEMBER: &[&str] = &["message:hasMember", "hasMember"];
const EVENT: &[&str] = &["event:Event", "Event"];
const TIME_SLICE: &[&str] = &["event:timeSlice", "timeSlice"];
const EVENT_TIME_SLICE: &[&str] = &["event:EventTimeSlice", "EventTimeSlice"];
const TEXT_NOTAM: &[&str] = &["event:textNOTAM", "textNOTAM"];
const NOTAM: &[&str] = &["event:NOTAM", "NOTAM"];

const VALID_TIME: &[&str] = &["gml:validTime", "validTime"];
const TIME_PERIOD: &[&str] = &["gml:TimePeriod", "TimePeriod"];
const BEGIN_POSITION: &[&str] = &["gml:beginPosition", "beginPosition"];
const END_POSITION: &[&str] = &["gml:endPosition", "endPosition"];

// ============================================================================
// Fields
// ============================================================================

const IDENTIFIER: &[&str] = &["event:identifier", "identifier", "event:notamId", "notamId"];
const SERIES: &[&str] = &["event:series", "series"];
const NUMBER: &[&str] = &["event:number", "number"];
const YEAR: &[&str] = &["event:year", "year"];
const LOCATION: &[&str] = &["event:location", "location"];
const AFFECTED_FIR: &[&str] = &["event:affectedFIR", "affectedFIR"];
const BODY: &[&str] = &["event:text", "text", "event:itemE", "itemE"];
const EFFECTIVE_START: &[&str] = &["event:effectiveStart", "effectiveStart"];
const EFFECTIVE_END: &[&str] = &["event:effectiveEnd", "effectiveEnd"];
const SCHEDULE: &[&str] = &["event:schedule", "schedule", "event:itemD", "itemD"];
const PURPOSE: &[&str] = &["event:purpose", "purpose"];
const SCOPE: &[&str] = &["event:scope", "scope"];
const TRAFFIC: &[&str] = &["event:traffic", "traffic", "event:trafficType", "trafficType"];
const SELECTION_CODE: &[&str] = &["event:selectionCode", "selectionCode"];
const LOWER_FL: &[&str] = &["event:minimumFL", "minimumFL", "event:lowerLimit", "lowerLimit"];
const UPPER_FL: &[&str] = &["event:maximumFL", "maximumFL", "event:upperLimit", "upperLimit"];
const COORDINATES: &[&str] = &["event:coordinates", "coordinates"];
const RADIUS: &[&str] = &["event:radius", "radius"];

/// Placeholder used when a message carries no identifier at all
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Extract a notice from a parsed AIXM document
pub fn notice_from_document(root: &XmlNode, raw: &[u8]) -> Result<Notice, ParseFailure> {
    if !root.is(ROOT) {
        return Err(ParseFailure::MissingRootElement(format!(
            "unexpected root <{}>",
            root.name
        )));
    }

    let event = root
        .children_named(HAS_MEMBER)
        .find_map(|member| member.child(EVENT))
        .ok_or(ParseFailure::MissingNestedSection("hasMember/Event"))?;
    let slice = event
        .child(TIME_SLICE)
        .ok_or(ParseFailure::MissingNestedSection("timeSlice"))?
        .child(EVENT_TIME_SLICE)
        .ok_or(ParseFailure::MissingNestedSection("EventTimeSlice"))?;
    let notam = slice
        .child(TEXT_NOTAM)
        .ok_or(ParseFailure::MissingNestedSection("textNOTAM"))?
        .child(NOTAM)
        .ok_or(ParseFailure::MissingNestedSection("NOTAM"))?;

    let identifier = identifier(notam);
    let location = notam
        .text_of(LOCATION)
        .or_else(|| notam.text_of(AFFECTED_FIR))
        .ok_or(ParseFailure::MissingRequiredField("location"))?;

    let period = slice.path(&[VALID_TIME, TIME_PERIOD]);
    let start_raw = notam
        .text_of(EFFECTIVE_START)
        .or_else(|| period.and_then(|p| p.text_of(BEGIN_POSITION)))
        .ok_or(ParseFailure::MissingRequiredField("effectiveStart"))?;
    let start = parse_notice_date(start_raw).ok_or_else(|| ParseFailure::DateUnparseable {
        field: "effectiveStart",
        value: start_raw.to_string(),
    })?;
    let end = notam
        .text_of(EFFECTIVE_END)
        .or_else(|| period.and_then(|p| p.text_of(END_POSITION)))
        .and_then(|value| end_date(&identifier, value));

    let owned = |names: &[&str]| notam.text_of(names).map(str::to_string);

    Ok(Notice::builder(identifier.as_str(), location, start, NoticeFormat::Xml)
        .effective_end(end)
        .schedule(owned(SCHEDULE))
        .body(notam.text_of(BODY).unwrap_or_default())
        .qualifier(qualifier(notam))
        .purpose(owned(PURPOSE))
        .scope(owned(SCOPE))
        .traffic_type(owned(TRAFFIC))
        .raw_payload(raw)
        .build())
}

/// Explicit identifier, else `{series}{number}/{year}`, else the placeholder
fn identifier(notam: &XmlNode) -> String {
    if let Some(id) = notam.text_of(IDENTIFIER) {
        return id.to_string();
    }
    match (notam.text_of(NUMBER), notam.text_of(YEAR)) {
        (Some(number), Some(year)) => {
            format!("{}{number}/{year}", notam.text_of(SERIES).unwrap_or_default())
        },
        _ => UNKNOWN_IDENTIFIER.to_string(),
    }
}

fn end_date(identifier: &str, value: &str) -> Option<DateTime<Utc>> {
    if is_permanent_marker(value) {
        return None;
    }
    let parsed = parse_notice_date(value);
    if parsed.is_none() {
        debug!(
            identifier,
            value,
            category = "date-unparseable",
            "Treating unparseable effectiveEnd as permanent"
        );
    }
    parsed
}

/// Qualifier sub-record; absent unless a qualifier-specific field exists
fn qualifier(notam: &XmlNode) -> Option<Qualifier> {
    let number = |names: &[&str]| notam.text_of(names).and_then(|v| v.parse::<u32>().ok());
    let owned = |names: &[&str]| notam.text_of(names).map(str::to_string);

    let code = owned(SELECTION_CODE);
    let lower_fl = number(LOWER_FL);
    let upper_fl = number(UPPER_FL);
    let coordinates = owned(COORDINATES);
    let radius_nm = number(RADIUS);

    if code.is_none()
        && lower_fl.is_none()
        && upper_fl.is_none()
        && coordinates.is_none()
        && radius_nm.is_none()
    {
        return None;
    }

    Some(Qualifier {
        fir: owned(AFFECTED_FIR),
        code,
        traffic: owned(TRAFFIC),
        purpose: owned(PURPOSE),
        scope: owned(SCOPE),
        lower_fl,
        upper_fl,
        coordinates,
        radius_nm,
    })
}
