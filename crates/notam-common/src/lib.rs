//! NOTAM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the NOTAM ingestion workspace.
//!
//! # Overview
//!
//! - **Types**: the canonical [`Notice`] record produced by the parser and
//!   persisted by the server, plus its optional [`Qualifier`] sub-record
//! - **Error Handling**: [`NotamError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use notam_common::{Notice, NoticeFormat, Result};
//!
//! fn check() -> Result<()> {
//!     let notice = Notice::builder("A0001/25", "KJFK", Utc::now(), NoticeFormat::Text)
//!         .body("RWY 04L/22R CLSD")
//!         .build();
//!     notice.validate()
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{NotamError, Result, Violation};
pub use types::{Notice, NoticeBuilder, NoticeFormat, Qualifier};
