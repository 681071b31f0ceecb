//! NOTAM Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Stateless translation of raw notice payloads into the canonical
//! [`notam_common::Notice`] record.
//!
//! # Supported Formats
//!
//! - **XML**: AIXM-style `AIXMBasicMessage` documents, with or without
//!   namespace prefixes
//! - **Text**: legacy ICAO line-tagged notices (`A)` .. `E)`, plus `Q)`)
//!
//! # Example
//!
//! ```no_run
//! use notam_ingest::NoticeParser;
//!
//! let parser = NoticeParser::new();
//! let raw = b"A2/1234\nA) KJFK\nB) 2501151400\nC) PERM\nE) RWY 04L/22R CLSD";
//! if let Some(notice) = parser.parse(raw) {
//!     assert!(notice.is_permanent());
//! }
//! ```

pub mod dates;
pub mod error;
pub mod parser;
pub mod text;
pub mod xml;

pub use error::ParseFailure;
pub use parser::NoticeParser;
