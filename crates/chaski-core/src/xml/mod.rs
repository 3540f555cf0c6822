//! Minimal XML element tree for the Chaski wire protocol
//!
//! The protocol has no mixed content, so an element carries either text or
//! child elements. Namespace prefixes are dropped on input and every element
//! is written back in the `chaski` namespace.

mod path;
mod reader;
mod schema;

pub use path::PathExpr;
pub use reader::{read_document, BoundedReader};
pub use schema::Schema;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Namespace of every Chaski element
pub const NAMESPACE: &str = "urn:chaski:org";

/// Prefix bound to [`NAMESPACE`] on output
pub const PREFIX: &str = "chaski";

/// XML ingestion errors
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Io(String),

    #[error("Unexpected end of document")]
    Incomplete,

    #[error("Schema violation: {0}")]
    Schema(String),
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        match e {
            quick_xml::Error::Io(io) => XmlError::Io(io.to_string()),
            other => XmlError::Syntax(other.to_string()),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        XmlError::Syntax(e.to_string())
    }
}

/// One element with its attributes and either text or children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Leaf element holding `text`
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child named `name`
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children named `name`, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child named `name`
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// Serialize as a standalone document fragment with the namespace declared
    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write_into(&mut out, true);
        out.into_bytes()
    }

    fn write_into(&self, out: &mut String, root: bool) {
        out.push('<');
        out.push_str(PREFIX);
        out.push(':');
        out.push_str(&self.name);
        if root {
            out.push_str(" xmlns:");
            out.push_str(PREFIX);
            out.push_str("=\"");
            out.push_str(NAMESPACE);
            out.push('"');
        }
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.write_into(out, false);
        }
        out.push_str("</");
        out.push_str(PREFIX);
        out.push(':');
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Builds the element tree from reader events, one root element only
#[derive(Default)]
pub(crate) struct TreeBuilder {
    stack: Vec<Element>,
}

impl TreeBuilder {
    /// Feed one event; returns the root once it is closed
    pub(crate) fn feed(&mut self, event: Event<'_>) -> Result<Option<Element>, XmlError> {
        match event {
            Event::Start(start) => {
                let element = Self::open(&start)?;
                self.stack.push(element);
                Ok(None)
            }
            Event::Empty(start) => {
                let element = Self::open(&start)?;
                self.stack.push(element);
                Ok(self.close())
            }
            Event::End(_) => Ok(self.close()),
            Event::Text(text) => {
                let text = text.unescape()?;
                self.text(&text)?;
                Ok(None)
            }
            Event::CData(data) => {
                let data = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| XmlError::Syntax(format!("Invalid UTF-8 in CDATA: {}", e)))?;
                self.text(&data)?;
                Ok(None)
            }
            Event::Eof => Err(XmlError::Incomplete),
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => Ok(None),
        }
    }

    fn open(start: &BytesStart<'_>) -> Result<Element, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut element = Element::new(name);

        for attr in start.attributes() {
            let attr = attr?;
            let key = attr.key;
            if key.as_ref() == b"xmlns" || key.prefix().map(|p| p.as_ref() == b"xmlns").unwrap_or(false) {
                continue;
            }
            let value = attr.unescape_value()?.into_owned();
            let key = String::from_utf8_lossy(key.local_name().as_ref()).into_owned();
            element.attrs.push((key, value));
        }

        Ok(element)
    }

    fn close(&mut self) -> Option<Element> {
        let mut element = self.stack.pop()?;
        if !element.children.is_empty() && element.text.trim().is_empty() {
            element.text.clear();
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(element);
                None
            }
            None => Some(element),
        }
    }

    fn text(&mut self, text: &str) -> Result<(), XmlError> {
        match self.stack.last_mut() {
            Some(top) => {
                top.text.push_str(text);
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => Err(XmlError::Syntax(format!(
                "Text outside of the root element: {:?}",
                text.trim()
            ))),
        }
    }
}

/// Parse one document from memory; content after the root is ignored
pub fn parse(data: &[u8]) -> Result<Element, XmlError> {
    let mut reader = Reader::from_reader(data);
    let mut builder = TreeBuilder::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if let Some(root) = builder.feed(event)? {
            return Ok(root);
        }
        buf.clear();
    }
}
