//! Parse failure taxonomy
//!
//! Every failure is non-fatal: the parser reports it as "no record" and the
//! caller logs the [`ParseFailure::category`] tag.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// Payload is not well-formed XML or lacks the message root
    #[error("missing root element: {0}")]
    MissingRootElement(String),

    #[error("missing nested section: {0}")]
    MissingNestedSection(&'static str),

    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("unparseable date in {field}: {value:?}")]
    DateUnparseable { field: &'static str, value: String },

    #[error("text notice missing required lines: {0}")]
    TextMissingRequiredLines(String),

    /// A field holds a character the store cannot persist (NUL)
    #[error("forbidden character in {0}")]
    ForbiddenCharacter(&'static str),
}

impl ParseFailure {
    /// Stable category tag used in logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ParseFailure::MissingRootElement(_) => "missing-root-element",
            ParseFailure::MissingNestedSection(_) => "missing-nested-section",
            ParseFailure::MissingRequiredField(_) => "missing-required-field",
            ParseFailure::DateUnparseable { .. } => "date-unparseable",
            ParseFailure::TextMissingRequiredLines(_) => "text-missing-required-lines",
            ParseFailure::ForbiddenCharacter(_) => "forbidden-character",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_kebab_case() {
        let failures = [
            ParseFailure::MissingRootElement("eof".into()),
            ParseFailure::MissingNestedSection("Event"),
            ParseFailure::MissingRequiredField("location"),
            ParseFailure::DateUnparseable {
                field: "effective_start",
                value: "tomorrow".into(),
            },
            ParseFailure::TextMissingRequiredLines("A)".into()),
            ParseFailure::ForbiddenCharacter("body"),
        ];
        let categories: Vec<_> = failures.iter().map(ParseFailure::category).collect();
        assert_eq!(
            categories,
            [
                "missing-root-element",
                "missing-nested-section",
                "missing-required-field",
                "date-unparseable",
                "text-missing-required-lines",
                "forbidden-character",
            ]
        );
    }
}
