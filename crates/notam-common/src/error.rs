//! Error types shared across the NOTAM workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, NotamError>;

/// Main error type for the canonical record layer
#[derive(Error, Debug)]
pub enum NotamError {
    #[error("Invalid notice: {0}")]
    InvalidNotice(#[from] Violation),

    #[error("Unknown notice format: {0}")]
    UnknownFormat(String),
}

/// A broken record invariant, naming the offending field
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Postgres text and jsonb columns cannot hold U+0000
    #[error("{0} contains a NUL character")]
    NulCharacter(&'static str),
}

impl Violation {
    pub fn field(&self) -> &'static str {
        match self {
            Violation::Empty(field) | Violation::NulCharacter(field) => field,
        }
    }
}
