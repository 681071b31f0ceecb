//! Structured (XML) notice path

pub mod aixm;
pub mod tree;

pub use tree::XmlNode;

use notam_common::Notice;

use crate::error::ParseFailure;

/// Parse an AIXM XML payload into a notice
pub fn parse_xml(raw: &[u8]) -> Result<Notice, ParseFailure> {
    let root = XmlNode::parse(raw)?;
    aixm::notice_from_document(&root, raw)
}
