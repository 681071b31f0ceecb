//! Generic element tree built from a streaming `quick-xml` reader.
//!
//! The structured path never binds to a fixed schema; it walks this tree with
//! ordered lists of candidate element names instead, so documents with or
//! without namespace prefixes resolve the same way.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ParseFailure;

/// One element: qualified name, child elements in document order, and the
/// concatenated (trimmed) character data directly inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// Parse a complete document and return its root element.
    ///
    /// Anything that is not a single well-formed element tree is reported as
    /// [`ParseFailure::MissingRootElement`].
    pub fn parse(raw: &[u8]) -> Result<XmlNode, ParseFailure> {
        let mut reader = Reader::from_reader(raw);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                ParseFailure::MissingRootElement(format!(
                    "malformed XML at byte {}: {e}",
                    reader.error_position()
                ))
            })?;

            match event {
                Event::Start(start) => {
                    stack.push(XmlNode::named(start.name().as_ref()));
                },
                Event::Empty(start) => {
                    let node = XmlNode::named(start.name().as_ref());
                    attach(&mut stack, &mut root, node)?;
                },
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| {
                        ParseFailure::MissingRootElement("unbalanced closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, node)?;
                },
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| {
                        ParseFailure::MissingRootElement(format!("bad character data: {e}"))
                    })?;
                    push_text(&mut stack, &text);
                },
                Event::CData(data) => {
                    push_text(&mut stack, &String::from_utf8_lossy(&data));
                },
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype
                _ => {},
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(ParseFailure::MissingRootElement(format!(
                "document ends inside <{}>",
                open.name
            )));
        }
        root.ok_or_else(|| ParseFailure::MissingRootElement("no element found".to_string()))
    }

    fn named(name: &[u8]) -> Self {
        XmlNode {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }

    /// True when this element's name is one of `names`
    pub fn is(&self, names: &[&str]) -> bool {
        names.contains(&self.name.as_str())
    }

    /// First child matching the earliest possible candidate name.
    ///
    /// Candidates are tried in order, so `["event:text", "text"]` prefers the
    /// prefixed element even when the bare one appears first.
    pub fn child(&self, names: &[&str]) -> Option<&XmlNode> {
        names
            .iter()
            .find_map(|name| self.children.iter().find(|c| c.name == *name))
    }

    /// All children matching any candidate, in document order
    pub fn children_named<'a>(&'a self, names: &'a [&str]) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.is(names))
    }

    /// Trimmed text of the first matching child, `None` when absent or blank
    pub fn text_of(&self, names: &[&str]) -> Option<&str> {
        self.child(names)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Follow a chain of steps, each a list of candidate names
    pub fn path(&self, steps: &[&[&str]]) -> Option<&XmlNode> {
        steps.iter().try_fold(self, |node, names| node.child(names))
    }
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), ParseFailure> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(ParseFailure::MissingRootElement(format!(
                "second top-level element <{}>",
                node.name
            )))
        },
    }
    Ok(())
}

fn push_text(stack: &mut [XmlNode], text: &str) {
    // Character data outside the root element is ignored
    if let Some(node) = stack.last_mut() {
        if !node.text.is_empty() {
            node.text.push(' ');
        }
        node.text.push_str(text);
    }
}
