//! Canonical notice record shared by the parser and the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NotamError, Result, Violation};

/// Wire format a notice was delivered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeFormat {
    /// Structured AIXM-style XML document
    Xml,
    /// Legacy line-tagged ICAO text
    Text,
}

impl NoticeFormat {
    /// Detect the wire format from the first non-whitespace byte.
    ///
    /// `<` selects the XML path, anything else (including an empty payload)
    /// selects the tagged-text path.
    pub fn detect(raw: &[u8]) -> Self {
        match raw.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => NoticeFormat::Xml,
            _ => NoticeFormat::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeFormat::Xml => "xml",
            NoticeFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for NoticeFormat {
    type Err = NotamError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xml" => Ok(NoticeFormat::Xml),
            "text" | "txt" => Ok(NoticeFormat::Text),
            _ => Err(NotamError::UnknownFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for NoticeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured qualifier sub-record (the ICAO `Q)` line or its XML equivalent)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fir: Option<String>,
    /// Five letter NOTAM code, e.g. `QMRLC`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Lower bound in flight levels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_fl: Option<u32>,
    /// Upper bound in flight levels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_fl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<String>,
    /// Radius of influence in nautical miles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_nm: Option<u32>,
}

impl Qualifier {
    /// True when no field carries a value
    pub fn is_empty(&self) -> bool {
        self == &Qualifier::default()
    }
}

/// The canonical, storage-ready representation of one ingested notice.
///
/// `effective_end == None` means the notice is permanent. Timestamps managed
/// by the store (`created_at`, `updated_at`) are deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Business key, e.g. `A4146/2025`
    pub identifier: String,
    pub location: String,
    pub effective_start: DateTime<Utc>,
    pub effective_end: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub body: String,
    pub qualifier: Option<Qualifier>,
    pub purpose: Option<String>,
    pub scope: Option<String>,
    pub traffic_type: Option<String>,
    pub source_format: NoticeFormat,
    /// Payload exactly as delivered; not part of the JSON representation
    #[serde(skip)]
    pub raw_payload: Vec<u8>,
}

impl Notice {
    /// Start building a notice from its required fields
    pub fn builder(
        identifier: impl Into<String>,
        location: impl Into<String>,
        effective_start: DateTime<Utc>,
        source_format: NoticeFormat,
    ) -> NoticeBuilder {
        NoticeBuilder {
            notice: Notice {
                identifier: identifier.into(),
                location: location.into(),
                effective_start,
                effective_end: None,
                schedule: None,
                body: String::new(),
                qualifier: None,
                purpose: None,
                scope: None,
                traffic_type: None,
                source_format,
                raw_payload: Vec::new(),
            },
        }
    }

    /// Check the record invariants that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(NotamError::from)
    }

    /// Like [`Notice::validate`], reporting the bare [`Violation`]
    pub fn check(&self) -> std::result::Result<(), Violation> {
        if self.identifier.trim().is_empty() {
            return Err(Violation::Empty("identifier"));
        }
        if self.location.trim().is_empty() {
            return Err(Violation::Empty("location"));
        }
        if let Some((field, _)) = self.text_fields().find(|(_, value)| value.contains('\0')) {
            return Err(Violation::NulCharacter(field));
        }
        if let Some(end) = self.effective_end {
            if end < self.effective_start {
                tracing::debug!(
                    identifier = %self.identifier,
                    start = %self.effective_start,
                    end = %end,
                    "Notice ends before it starts"
                );
            }
        }
        Ok(())
    }

    /// Every stored text value, qualifier included, by field name
    fn text_fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let scalars = [
            ("identifier", Some(self.identifier.as_str())),
            ("location", Some(self.location.as_str())),
            ("body", Some(self.body.as_str())),
            ("schedule", self.schedule.as_deref()),
            ("purpose", self.purpose.as_deref()),
            ("scope", self.scope.as_deref()),
            ("traffic_type", self.traffic_type.as_deref()),
        ];
        let qualifier = self.qualifier.iter().flat_map(|q| {
            [
                ("qualifier.fir", q.fir.as_deref()),
                ("qualifier.code", q.code.as_deref()),
                ("qualifier.traffic", q.traffic.as_deref()),
                ("qualifier.purpose", q.purpose.as_deref()),
                ("qualifier.scope", q.scope.as_deref()),
                ("qualifier.coordinates", q.coordinates.as_deref()),
            ]
        });
        scalars
            .into_iter()
            .chain(qualifier)
            .filter_map(|(field, value)| value.map(|v| (field, v)))
    }

    /// Permanent notices have no expiration and are never pruned
    pub fn is_permanent(&self) -> bool {
        self.effective_end.is_none()
    }
}

/// Builder for [`Notice`]
#[derive(Debug, Clone)]
pub struct NoticeBuilder {
    notice: Notice,
}

impl NoticeBuilder {
    pub fn effective_end(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.notice.effective_end = end;
        self
    }

    pub fn schedule(mut self, schedule: Option<String>) -> Self {
        self.notice.schedule = schedule;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.notice.body = body.into();
        self
    }

    pub fn qualifier(mut self, qualifier: Option<Qualifier>) -> Self {
        self.notice.qualifier = qualifier.filter(|q| !q.is_empty());
        self
    }

    pub fn purpose(mut self, purpose: Option<String>) -> Self {
        self.notice.purpose = purpose;
        self
    }

    pub fn scope(mut self, scope: Option<String>) -> Self {
        self.notice.scope = scope;
        self
    }

    pub fn traffic_type(mut self, traffic_type: Option<String>) -> Self {
        self.notice.traffic_type = traffic_type;
        self
    }

    pub fn raw_payload(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.notice.raw_payload = raw.into();
        self
    }

    pub fn build(self) -> Notice {
        self.notice
    }
}
