//! Format-detecting entry point

use notam_common::{Notice, NoticeFormat, Violation};
use tracing::debug;

use crate::error::ParseFailure;
use crate::{text, xml};

/// Stateless payload translator.
///
/// Cheap to construct and safe to share; holds no per-message state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoticeParser;

impl NoticeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a payload, reporting malformed input as `None`.
    ///
    /// Never panics on malformed input. The failure category is logged at
    /// debug level; use [`NoticeParser::try_parse`] to inspect it.
    pub fn parse(&self, raw: &[u8]) -> Option<Notice> {
        match self.try_parse(raw) {
            Ok(notice) => Some(notice),
            Err(failure) => {
                debug!(category = failure.category(), error = %failure, "Unparseable notice");
                None
            },
        }
    }

    /// Parse a payload, returning the reason on failure
    pub fn try_parse(&self, raw: &[u8]) -> Result<Notice, ParseFailure> {
        let notice = match NoticeFormat::detect(raw) {
            NoticeFormat::Xml => xml::parse_xml(raw)?,
            NoticeFormat::Text => text::parse_text(raw)?,
        };

        notice.check().map_err(|violation| match violation {
            Violation::Empty(field) => ParseFailure::MissingRequiredField(field),
            Violation::NulCharacter(field) => ParseFailure::ForbiddenCharacter(field),
        })?;

        Ok(notice)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatches_on_leading_byte() {
        let parser = NoticeParser::new();
        let err = parser.try_parse(b"\n  <unknown/>").unwrap_err();
        assert_eq!(err.category(), "missing-root-element");

        let err = parser.try_parse(b"not a notice").unwrap_err();
        assert_eq!(err.category(), "text-missing-required-lines");
    }

    #[test]
    fn test_parse_swallows_failures() {
        let parser = NoticeParser::new();
        assert!(parser.parse(b"<broken").is_none());
        assert!(parser.parse(&[0xff, 0xfe, 0x00]).is_none());
        assert!(parser.parse(b"A2/1234\nA) KJFK\nB) 2501151400").is_some());
    }

    #[test]
    fn test_nul_in_parsed_field_is_unparseable() {
        let parser = NoticeParser::new();
        let err = parser
            .try_parse(b"A2/1234\nA) KJFK\nB) 2501151400\nE) RWY CLSD\0")
            .unwrap_err();
        assert_eq!(err, ParseFailure::ForbiddenCharacter("body"));
        assert_eq!(err.category(), "forbidden-character");

        let err = parser.try_parse(b"A2/1234\nA) KJ\0FK\nB) 2501151400").unwrap_err();
        assert_eq!(err, ParseFailure::ForbiddenCharacter("location"));
    }

    #[test]
    fn test_raw_payload_keeps_original_bytes() {
        // 0xE9 is Latin-1 e-acute, invalid as UTF-8
        let raw = b"A2/1234\nA) KJFK\nB) 2501151400\nE) CAF\xe9 CLSD";
        let notice = NoticeParser::new().try_parse(raw).unwrap();
        assert_eq!(notice.raw_payload, raw.to_vec());
        assert_eq!(notice.body, "CAF\u{fffd} CLSD");
    }
}
